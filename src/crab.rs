pub const CRAB: &str = r"
    _~^~^~_        MITM Crab
\) /  o o  \ (/    answers for everyone
  '_   ¬   _'
  / '-----' \
";
