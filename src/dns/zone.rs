use crate::config::DnsConfig;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use trust_dns_server::client::rr::{LowerName, RecordType};

/// A rule consulted, in order, when no exact record matches an `A` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// Matches any name containing `keyword`.
    Keyword { keyword: String, address: Ipv4Addr },
    /// Matches every name.
    Wildcard { address: Ipv4Addr },
}

impl Fallback {
    fn matches(&self, name: &str) -> bool {
        match self {
            Fallback::Keyword { keyword, .. } => name.contains(keyword.as_str()),
            Fallback::Wildcard { .. } => true,
        }
    }

    fn address(&self) -> Ipv4Addr {
        match self {
            Fallback::Keyword { address, .. } | Fallback::Wildcard { address } => *address,
        }
    }

    fn source(&self) -> AnswerSource {
        match self {
            Fallback::Keyword { keyword, .. } => AnswerSource::Keyword(keyword.clone()),
            Fallback::Wildcard { .. } => AnswerSource::Wildcard,
        }
    }
}

/// What produced an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerSource {
    Record,
    Keyword(String),
    Wildcard,
}

impl fmt::Display for AnswerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerSource::Record => write!(f, "record"),
            AnswerSource::Keyword(keyword) => write!(f, "keyword:{keyword}"),
            AnswerSource::Wildcard => write!(f, "wildcard"),
        }
    }
}

/// The outcome of looking a question up in a [`Zone`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Answer {
        address: Ipv4Addr,
        source: AnswerSource,
    },
    NoAnswer,
}

/// The static records and fallback rules the responder answers from. Built once at startup
/// and never mutated.
#[derive(Debug, Clone, Default)]
pub struct Zone {
    records: HashMap<LowerName, Ipv4Addr>,
    fallbacks: Vec<Fallback>,
}

impl Zone {
    #[must_use]
    pub fn new(records: HashMap<LowerName, Ipv4Addr>, fallbacks: Vec<Fallback>) -> Self {
        Zone { records, fallbacks }
    }

    /// Build the zone from config. Fallbacks are ordered: the `ntp` shorthand, then each
    /// configured keyword, then the wildcard.
    #[must_use]
    pub fn from_config(config: &DnsConfig) -> Self {
        let mut fallbacks = Vec::new();
        if let Some(address) = config.ntp {
            fallbacks.push(Fallback::Keyword {
                keyword: "ntp".to_string(),
                address,
            });
        }
        fallbacks.extend(config.keyword_fallbacks.iter().map(|fallback| {
            Fallback::Keyword {
                keyword: fallback.keyword.to_lowercase(),
                address: fallback.address,
            }
        }));
        if let Some(address) = config.wildcard {
            fallbacks.push(Fallback::Wildcard { address });
        }
        Zone::new(config.records.clone(), fallbacks)
    }

    #[must_use]
    pub fn fallbacks(&self) -> &[Fallback] {
        &self.fallbacks
    }

    /// Decide the answer for a single question. Only `A` questions can produce an answer.
    #[must_use]
    pub fn resolve(&self, name: &LowerName, query_type: RecordType) -> Resolution {
        if query_type != RecordType::A {
            return Resolution::NoAnswer;
        }
        if let Some(address) = self.records.get(name) {
            return Resolution::Answer {
                address: *address,
                source: AnswerSource::Record,
            };
        }

        let name = name.to_string();
        self.fallbacks
            .iter()
            .find(|fallback| fallback.matches(&name))
            .map_or(Resolution::NoAnswer, |fallback| Resolution::Answer {
                address: fallback.address(),
                source: fallback.source(),
            })
    }
}
