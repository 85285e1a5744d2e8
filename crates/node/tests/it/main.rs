mod ddex;
mod entity;
mod membership;
mod pos;
mod reward;
mod rpc;
mod sla;
mod utils;
