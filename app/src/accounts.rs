//! Customer records, looked up by mobile number.
//!
//! Signing in only finds the record with a matching mobile number; nothing is
//! verified. Anyone who knows a customer's number can act as that customer.
//! This is an identity lookup, not authentication.

use anyhow::{Context, Result};
use err_derive::Error;
use log::*;
use r2d2::Pool;
use serde::{Deserialize, Serialize};

use infra::documents::{DocMeta, HasMeta};
use infra::ids::{Entity, Id};
use infra::persistence::{Query, Storage};

use crate::services::{Commandable, Request};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(flatten)]
    pub meta: DocMeta<User>,
    pub first_name: String,
    pub last_name: String,
    pub mobile: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error(display = "{} is required", _0)]
    MissingField(&'static str),
    #[error(display = "mobile number {} is already registered", _0)]
    MobileTaken(String),
    #[error(display = "no customer with mobile number {}", _0)]
    UnknownMobile(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUp {
    pub first_name: String,
    pub last_name: String,
    pub mobile: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignIn {
    pub mobile: String,
}

#[derive(Debug)]
pub struct Accounts<M: r2d2::ManageConnection> {
    db: Pool<M>,
}

impl Entity for User {
    const PREFIX: &'static str = "user";
}

impl HasMeta for User {
    fn meta(&self) -> &DocMeta<Self> {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut DocMeta<Self> {
        &mut self.meta
    }
}

impl Request for SignUp {
    type Resp = User;
}

impl Request for SignIn {
    type Resp = User;
}

fn required(field: &'static str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AccountError::MissingField(field).into());
    }
    Ok(value.to_string())
}

fn by_mobile<D: Storage>(docs: &D, mobile: &str) -> Result<Vec<User>> {
    let q = Query::<User>::all().where_eq("mobile", mobile)?;
    docs.query(&q).context("find user by mobile")
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Accounts<M> {
    pub fn new(db: Pool<M>) -> Self {
        Accounts { db }
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Commandable<SignUp>
    for Accounts<M>
{
    fn execute(&self, req: SignUp) -> Result<User> {
        let first_name = required("first name", &req.first_name)?;
        let last_name = required("last name", &req.last_name)?;
        let mobile = required("mobile", &req.mobile)?;

        let docs = self.db.get()?;
        if !by_mobile(&*docs, &mobile)?.is_empty() {
            info!("Refusing sign-up; mobile {} is taken", mobile);
            return Err(AccountError::MobileTaken(mobile).into());
        }

        let mut user = User {
            meta: DocMeta::default(),
            first_name,
            last_name,
            mobile,
        };
        let id = docs.create(&mut user).context("create user")?;
        info!("Signed up {}", id);
        Ok(user)
    }
}

impl<M: r2d2::ManageConnection<Connection = D>, D: Storage + Send + 'static> Commandable<SignIn>
    for Accounts<M>
{
    fn execute(&self, req: SignIn) -> Result<User> {
        let mobile = required("mobile", &req.mobile)?;
        let docs = self.db.get()?;
        let user = by_mobile(&*docs, &mobile)?
            .into_iter()
            .next()
            .ok_or_else(|| AccountError::UnknownMobile(mobile))?;
        info!("Signed in {}", user.meta.id);
        Ok(user)
    }
}

impl<M: r2d2::ManageConnection> Clone for Accounts<M> {
    fn clone(&self) -> Self {
        let db = self.db.clone();
        Accounts { db }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::junk_drawer;

    fn sign_up(first: &str, last: &str, mobile: &str) -> SignUp {
        SignUp {
            first_name: first.into(),
            last_name: last.into(),
            mobile: mobile.into(),
        }
    }

    #[test]
    fn sign_up_then_sign_in() {
        env_logger::try_init().unwrap_or_default();
        let accounts = Accounts::new(junk_drawer::pool());

        let created = accounts
            .execute(sign_up(" Asha ", "Rao", "9800000001"))
            .expect("sign up");
        assert_eq!(created.first_name, "Asha");

        let found = accounts
            .execute(SignIn {
                mobile: "9800000001 ".into(),
            })
            .expect("sign in");
        assert_eq!(found, created);
    }

    #[test]
    fn mobile_may_only_be_registered_once() {
        let accounts = Accounts::new(junk_drawer::pool());
        accounts
            .execute(sign_up("Asha", "Rao", "9800000001"))
            .expect("sign up");

        let err = accounts
            .execute(sign_up("Ravi", "Rao", "9800000001"))
            .expect_err("second sign up");

        assert_eq!(
            err.downcast_ref::<AccountError>(),
            Some(&AccountError::MobileTaken("9800000001".into()))
        );
    }

    #[test]
    fn blank_fields_are_rejected() {
        let accounts = Accounts::new(junk_drawer::pool());

        let err = accounts
            .execute(sign_up("Asha", "  ", "9800000001"))
            .expect_err("sign up");

        assert_eq!(
            err.downcast_ref::<AccountError>(),
            Some(&AccountError::MissingField("last name"))
        );
    }

    #[test]
    fn unknown_mobile_cannot_sign_in() {
        let accounts = Accounts::new(junk_drawer::pool());

        let err = accounts
            .execute(SignIn {
                mobile: "9811111111".into(),
            })
            .expect_err("sign in");

        assert_eq!(
            err.downcast_ref::<AccountError>(),
            Some(&AccountError::UnknownMobile("9811111111".into()))
        );
    }
}
