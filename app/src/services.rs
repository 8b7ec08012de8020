//! The shape shared by every service: a request type names its response,
//! and a service either answers it without side effects (`Queryable`) or
//! carries it out (`Commandable`).

use anyhow::Result;

pub trait Request {
    type Resp;
}

pub trait Queryable<Req>
where
    Req: Request,
{
    fn query(&self, req: Req) -> Result<Req::Resp>;
}

pub trait Commandable<Req>
where
    Req: Request,
{
    fn execute(&self, req: Req) -> Result<Req::Resp>;
}
