//! Guarded with `#[cfg(test)]` from `lib.rs`

use anyhow::Result;
use r2d2::Pool;
use rust_decimal::Decimal;

use infra::ids::Id;
use infra::persistence::Storage;

use crate::accounts::{SignUp, User};
use crate::cart::{compute_total, CartLine, QuantityChange, Selection, Step};
use crate::menu::{MenuCache, Portion};
use crate::orders::OrderHistory;
use crate::services::{Commandable, Queryable};
use crate::session::{MemorySessionStore, Session, SessionStore};
use crate::Tableside;

pub(crate) mod junk_drawer;

fn sign_up<M, D>(app: &Tableside<M>, sessions: &dyn SessionStore) -> Result<User>
where
    M: r2d2::ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    let user = app.accounts().execute(SignUp {
        first_name: "Meera".into(),
        last_name: "Iyer".into(),
        mobile: "9822222222".into(),
    })?;
    sessions.store(&Session::for_user(&user))?;
    Ok(user)
}

fn order_workflow<M, D>(pool: Pool<M>) -> Result<()>
where
    M: r2d2::ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    let app = Tableside::with_pool(pool);
    app.setup()?;
    let sessions = MemorySessionStore::new();
    let user = sign_up(&app, &sessions)?;
    let (tikka, naan) = {
        let docs = app.db.get()?;
        (
            junk_drawer::food(&*docs, "Paneer Tikka", 260, 150),
            junk_drawer::food(&*docs, "Butter Naan", 40, 0),
        )
    };

    let mut cart = app.cart();
    cart.load(sessions.user()?)?;
    let tikka_line = cart.add(&tikka, Selection { full: 1, half: 0 })?;
    cart.add(&naan, Selection { full: 2, half: 0 })?;
    cart.change_quantity(tikka_line, Portion::Half, Step::Increment)?;
    assert_eq!(cart.total(), Decimal::from(490));

    let placed = cart.checkout("T7")?;

    assert_eq!(placed.total, Decimal::from(490));
    assert_eq!(placed.items.len(), 2);
    assert!(cart.is_empty());
    assert_eq!(cart.total(), Decimal::ZERO);

    let mut fresh = app.cart();
    assert!(fresh.load(Some(user.meta.id))?.is_empty());

    let history = app.orders().query(OrderHistory { user: user.meta.id })?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].meta.id, placed.order_id);
    assert_eq!(history[0].table_number, "T7");
    Ok(())
}

#[test]
fn order_workflow_in_memory() -> Result<()> {
    env_logger::try_init().unwrap_or_default();
    order_workflow(junk_drawer::pool())
}

#[test]
#[ignore]
fn order_workflow_on_postgres() -> Result<()> {
    env_logger::try_init().unwrap_or_default();
    order_workflow(junk_drawer::postgres_pool("order_workflow_on_postgres")?)
}

#[test]
fn signed_out_customer_has_no_cart() {
    env_logger::try_init().unwrap_or_default();
    let app = Tableside::with_pool(junk_drawer::pool());
    let sessions = MemorySessionStore::new();
    sign_up(&app, &sessions).expect("sign up");
    sessions.clear().expect("sign out");

    let mut cart = app.cart();
    let err = cart.load(sessions.user().expect("user")).expect_err("load");

    assert_eq!(
        err.downcast_ref::<crate::cart::CartError>(),
        Some(&crate::cart::CartError::NotAuthenticated)
    );
}

#[test]
fn failed_quantity_write_leaves_cart_untouched() {
    env_logger::try_init().unwrap_or_default();
    let (pool, faults) = junk_drawer::faulty_pool();
    let app = Tableside::with_pool(pool);
    let docs = app.db.get().expect("conn");
    let dal = junk_drawer::food(&*docs, "Dal Makhani", 220, 120);
    let user = random_user();
    let mut cart = app.cart();
    cart.load(Some(user)).expect("load");
    let line = cart
        .add(&dal, Selection { full: 2, half: 0 })
        .expect("add");
    let before = cart.lines().to_vec();
    faults.fail_updates(true);

    cart.change_quantity(line, Portion::Full, Step::Increment)
        .expect_err("change");

    assert_eq!(cart.lines(), &before[..]);
    assert_eq!(cart.total(), Decimal::from(440));
    let stored: CartLine = docs.load(&line).expect("load").expect("present");
    assert_eq!(stored.full_portion_qty, 2);
}

#[test]
fn checkout_keeps_lines_that_could_not_be_cleared() {
    env_logger::try_init().unwrap_or_default();
    let (pool, faults) = junk_drawer::faulty_pool();
    let app = Tableside::with_pool(pool);
    let (dal, naan) = {
        let docs = app.db.get().expect("conn");
        (
            junk_drawer::food(&*docs, "Dal Makhani", 220, 120),
            junk_drawer::food(&*docs, "Butter Naan", 40, 0),
        )
    };
    let mut cart = app.cart();
    cart.load(Some(random_user())).expect("load");
    let stuck = cart
        .add(&dal, Selection { full: 1, half: 0 })
        .expect("add");
    cart.add(&naan, Selection { full: 1, half: 0 })
        .expect("add");
    faults.fail_delete(stuck);

    let placed = cart.checkout("4").expect("checkout");

    assert_eq!(placed.leftover, vec![stuck]);
    let remaining = cart.lines().iter().map(|l| l.meta.id).collect::<Vec<_>>();
    assert_eq!(remaining, vec![stuck]);
    assert_eq!(cart.total(), Decimal::from(220));
}

#[test]
fn quantity_follows_clamped_steps() {
    env_logger::try_init().unwrap_or_default();
    let pool = junk_drawer::pool();
    let docs = pool.get().expect("conn");
    let dal = junk_drawer::food(&*docs, "Dal Makhani", 220, 120);
    let mut cart = crate::cart::Cart::new(pool.clone());
    cart.load(Some(random_user())).expect("load");
    // The half portion keeps the line alive while the full one hits zero.
    let line = cart
        .add(&dal, Selection { full: 1, half: 1 })
        .expect("add");

    let steps = "--+---++-+".chars().map(|c| c.to_string().parse::<Step>());
    let mut expected = 1u32;
    for step in steps {
        let step = step.expect("step");
        expected = match step {
            Step::Increment => expected + 1,
            Step::Decrement => expected.saturating_sub(1),
        };
        let change = cart
            .change_quantity(line, Portion::Full, step)
            .expect("change");
        assert_eq!(
            change,
            QuantityChange::Updated {
                full: expected,
                half: 1
            }
        );
    }

    let stored: CartLine = docs.load(&line).expect("load").expect("present");
    assert_eq!(stored.full_portion_qty, expected);
}

#[test]
fn total_ignores_line_and_cache_order() {
    let docs = infra::memory::MemoryDocuments::new();
    let foods = vec![
        junk_drawer::food(&docs, "Dal Makhani", 220, 120),
        junk_drawer::food(&docs, "Butter Naan", 40, 0),
        junk_drawer::food(&docs, "Masala Chai", 30, 18),
    ];
    let user = random_user();
    let lines = foods
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let selection = Selection {
                full: i as u32 + 1,
                half: (i % 2) as u32,
            };
            CartLine::new(user, f.meta.id, selection, crate::now())
        })
        .collect::<Vec<_>>();

    let mut forwards = MenuCache::new();
    foods.iter().for_each(|f| forwards.insert(f));
    let mut backwards = MenuCache::new();
    foods.iter().rev().for_each(|f| backwards.insert(f));
    let reversed = lines.iter().rev().cloned().collect::<Vec<_>>();

    let expected = compute_total(&lines, &forwards);
    assert_eq!(expected, Decimal::from(220 + 80 + 90));
    assert_eq!(compute_total(&reversed, &forwards), expected);
    assert_eq!(compute_total(&lines, &backwards), expected);
    assert_eq!(compute_total(&reversed, &backwards), expected);
}

fn random_user() -> Id<User> {
    rand::random()
}
