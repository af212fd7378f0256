use crate::config::Shared;
use crate::dns::zone::{Resolution, Zone};
use crate::error::Error;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{error, info};
use trust_dns_server::authority::MessageResponseBuilder;
use trust_dns_server::client::op::{Header, MessageType, OpCode, ResponseCode};
use trust_dns_server::client::rr::{Name, RData, Record, RecordType};
use trust_dns_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

/// TTL, in seconds, of every synthesized A record.
pub const ANSWER_TTL: u32 = 60;

#[derive(Clone)]
pub struct Handler {
    zone: Arc<Zone>,
}

impl Handler {
    #[must_use]
    pub fn new(config: &Shared) -> Self {
        Self::from_zone(Zone::from_config(&config.dns))
    }

    #[must_use]
    pub fn from_zone(zone: Zone) -> Self {
        Handler {
            zone: Arc::new(zone),
        }
    }

    async fn dispatch_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response: R,
    ) -> Result<ResponseInfo, Error> {
        // If it isn't a query, return NOTIMPL.
        if request.op_code() != OpCode::Query || request.message_type() != MessageType::Query {
            return self.send_error(request, response, ResponseCode::NotImp).await;
        }

        // Queries without exactly one question are answered FORMERR by trust-dns while
        // parsing, so `request.query()` is always the single question here.
        match request.query().query_type() {
            RecordType::A => self.handle_request_a(request, response).await,
            _ => self.handle_no_answer(request, response).await,
        }
    }

    async fn handle_request_a<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        let query = request.query();
        let client = request.src().ip();
        match self.zone.resolve(query.name(), query.query_type()) {
            Resolution::Answer { address, source } => {
                info!(
                    %client,
                    name = %query.original().name(),
                    query_type = %query.query_type(),
                    %source,
                    %address,
                    "DNS answer"
                );
                self.send_auth_resp(request, response_handle, address)
                    .await
            }
            Resolution::NoAnswer => {
                info!(
                    %client,
                    name = %query.original().name(),
                    query_type = %query.query_type(),
                    "DNS no answer"
                );
                self.send_empty(request, response_handle, true).await
            }
        }
    }

    async fn handle_no_answer<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        let query = request.query();
        info!(
            client = %request.src().ip(),
            name = %query.original().name(),
            query_type = %query.query_type(),
            "DNS no answer"
        );
        self.send_empty(request, response_handle, false).await
    }

    async fn send_auth_resp<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        address: Ipv4Addr,
    ) -> Result<ResponseInfo, Error> {
        let owner: Name = request.query().name().into();
        let records = [Record::from_rdata(owner, ANSWER_TTL, RData::A(address))];
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(header, records.iter(), &[], &[], &[]);
        Ok(response_handle.send_response(response).await?)
    }

    async fn send_empty<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        authoritative: bool,
    ) -> Result<ResponseInfo, Error> {
        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(authoritative);
        let response = builder.build_no_records(header);
        Ok(response_handle.send_response(response).await?)
    }

    async fn send_error<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        code: ResponseCode,
    ) -> Result<ResponseInfo, Error> {
        let response = MessageResponseBuilder::from_message_request(request);
        Ok(response_handle
            .send_response(response.error_msg(request.header(), code))
            .await?)
    }
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        match self.dispatch_request(request, response_handle).await {
            Ok(info) => info,
            Err(error) => {
                error!(client = %request.src(), "error in RequestHandler: {:?}", error);
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}
