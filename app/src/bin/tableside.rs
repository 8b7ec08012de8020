use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::*;
use serde::Deserialize;
use structopt::StructOpt;

use infra::ids::Id;
use infra::persistence::DocumentConnectionManager;
use tableside::accounts::{SignIn, SignUp};
use tableside::cart::{Cart, CartLine, QuantityChange, Selection, Step};
use tableside::menu::{FoodItem, Listing, MenuEntry, Portion, SearchMenu, ShowFood, ShowMenu};
use tableside::orders::OrderHistory;
use tableside::services::{Commandable, Queryable};
use tableside::session::{Session, SessionStore};
use tableside::Tableside;

#[derive(Debug, StructOpt)]
#[structopt(name = "tableside", about = "Order food to your table.")]
struct Opt {
    /// Configuration file
    #[structopt(parse(from_os_str))]
    config: PathBuf,
    #[structopt(subcommand)]
    command: Commands,
}

#[derive(Debug, StructOpt)]
enum Commands {
    #[structopt(name = "setup", about = "Initialize the database")]
    Setup,
    #[structopt(name = "import-menu", about = "Load menu items from a TOML file")]
    ImportMenu {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
    },
    #[structopt(name = "sign-up", about = "Register and sign in")]
    SignUp {
        #[structopt(long = "first-name")]
        first_name: String,
        #[structopt(long = "last-name")]
        last_name: String,
        #[structopt(long = "mobile")]
        mobile: String,
    },
    #[structopt(name = "sign-in", about = "Sign in with a registered mobile number")]
    SignIn { mobile: String },
    #[structopt(name = "sign-out", about = "Forget the signed in customer")]
    SignOut,
    #[structopt(name = "menu", about = "Show the menu")]
    Menu {
        #[structopt(long = "search")]
        search: Option<String>,
    },
    #[structopt(name = "show", about = "Show one menu item")]
    Show { food: Id<FoodItem> },
    #[structopt(name = "add", about = "Add portions of a menu item to the cart")]
    Add {
        food: Id<FoodItem>,
        #[structopt(long = "full", default_value = "0")]
        full: u32,
        #[structopt(long = "half", default_value = "0")]
        half: u32,
    },
    #[structopt(name = "cart", about = "Show the cart")]
    Cart,
    #[structopt(name = "qty", about = "Step a portion's quantity up (+) or down (-)")]
    Qty {
        line: Id<CartLine>,
        portion: Portion,
        step: Step,
    },
    #[structopt(name = "remove", about = "Remove a line from the cart")]
    Remove {
        line: Id<CartLine>,
        /// Do not ask for confirmation
        #[structopt(long = "yes")]
        yes: bool,
    },
    #[structopt(name = "checkout", about = "Place an order for a table")]
    Checkout { table: String },
    #[structopt(name = "orders", about = "List past orders")]
    Orders,
}

#[derive(Deserialize, Debug)]
struct Config {
    #[serde(flatten)]
    tableside: tableside::config::Config,
    #[serde(default)]
    env_logger: tableside::config::EnvLogger,
}

#[derive(Deserialize, Debug)]
struct MenuFile {
    #[serde(rename = "item", default)]
    items: Vec<MenuEntry>,
}

type App = Tableside<DocumentConnectionManager>;

fn main() -> Result<()> {
    let opt = Opt::from_args();

    let config_buf = fs::read_to_string(&opt.config)
        .with_context(|| format!("read config {:?}", opt.config))?;
    let config: Config = toml::from_str(&config_buf).context("parse config")?;
    let config = Config {
        tableside: config.tableside.with_env_overrides()?,
        ..config
    };

    config.env_logger.builder().init();

    let app = Tableside::new(&config.tableside)?;
    let sessions = config.tableside.session.store();

    match opt.command {
        Commands::Setup => app.setup()?,
        Commands::ImportMenu { file } => {
            let buf = fs::read_to_string(&file).with_context(|| format!("read {:?}", file))?;
            let menu: MenuFile = toml::from_str(&buf).context("parse menu")?;
            let ids = app.menu().import(menu.items)?;
            println!("Imported {} items", ids.len());
        }
        Commands::SignUp {
            first_name,
            last_name,
            mobile,
        } => {
            let user = app.accounts().execute(SignUp {
                first_name,
                last_name,
                mobile,
            })?;
            sessions.store(&Session::for_user(&user))?;
            println!("Welcome, {}!", user.first_name);
        }
        Commands::SignIn { mobile } => {
            let user = app.accounts().execute(SignIn { mobile })?;
            sessions.store(&Session::for_user(&user))?;
            println!("Welcome back, {}!", user.first_name);
        }
        Commands::SignOut => {
            sessions.clear()?;
            println!("Signed out");
        }
        Commands::Menu { search } => {
            let listing = match search {
                Some(term) => app.menu().query(SearchMenu { term })?,
                None => app.menu().query(ShowMenu)?,
            };
            print_listing(&listing);
        }
        Commands::Show { food } => match app.menu().query(ShowFood { id: food })? {
            Some(food) => print_food(&food),
            None => bail!("No menu item {}", food),
        },
        Commands::Add { food, full, half } => {
            let food = match app.menu().query(ShowFood { id: food })? {
                Some(food) => food,
                None => bail!("No menu item {}", food),
            };
            let selection = Selection { full, half };
            let mut cart = load_cart(&app, &sessions)?;
            cart.add(&food, selection)?;
            println!(
                "Added {} for {}; cart total {}",
                food.name,
                selection.total(&food),
                cart.total()
            );
        }
        Commands::Cart => print_cart(&load_cart(&app, &sessions)?),
        Commands::Qty {
            line,
            portion,
            step,
        } => {
            let mut cart = load_cart(&app, &sessions)?;
            match cart.change_quantity(line, portion, step)? {
                QuantityChange::Updated { full, half } => {
                    println!("Now {} full, {} half", full, half)
                }
                QuantityChange::Removed => println!("Removed from cart"),
            }
            println!("Total {}", cart.total());
        }
        Commands::Remove { line, yes } => {
            let mut cart = load_cart(&app, &sessions)?;
            let removed = if yes {
                cart.remove_line(line, &|_: &str| true)?
            } else {
                cart.remove_line(line, &ask)?
            };
            if removed {
                println!("Removed; total {}", cart.total());
            }
        }
        Commands::Checkout { table } => {
            let mut cart = load_cart(&app, &sessions)?;
            let placed = cart.checkout(&table)?;
            println!(
                "Order {} placed for table {}: {} items, total {}",
                placed.order_id.short().to_uppercase(),
                table.trim(),
                placed.items.len(),
                placed.total
            );
            if !placed.leftover.is_empty() {
                println!(
                    "{} items could not be cleared from your cart; remove them before ordering again",
                    placed.leftover.len()
                );
            }
        }
        Commands::Orders => {
            let user = signed_in(&sessions)?;
            for order in app.orders().query(OrderHistory { user })? {
                println!(
                    "#{} {} table {} {:?} total {}",
                    order.reference(),
                    order.order_date.format("%Y-%m-%d %H:%M"),
                    order.table_number,
                    order.status,
                    order.total_amount
                );
                for item in order.items.iter() {
                    for row in item.rows() {
                        println!(
                            "    {} ({}) {} x {} = {}",
                            item.name, row.portion, row.qty, row.price, row.amount
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

fn signed_in<S: SessionStore>(sessions: &S) -> Result<Id<tableside::accounts::User>> {
    match sessions.user()? {
        Some(user) => Ok(user),
        None => bail!("Not signed in; use sign-in or sign-up first"),
    }
}

fn load_cart<S: SessionStore>(app: &App, sessions: &S) -> Result<Cart<DocumentConnectionManager>> {
    let mut cart = app.cart();
    cart.load(sessions.user()?)?;
    debug!("Cart holds {} lines", cart.lines().len());
    Ok(cart)
}

fn ask(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => answer.trim().eq_ignore_ascii_case("y"),
        Err(e) => {
            warn!("Could not read confirmation: {}", e);
            false
        }
    }
}

fn print_listing(listing: &Listing) {
    if listing.is_empty() {
        println!("Nothing found");
    }
    for (category, items) in listing {
        println!("{}", category);
        for food in items {
            println!(
                "  {}  {}{}  {}",
                food.meta.id,
                food.name,
                if food.is_vegetarian { " (veg)" } else { "" },
                prices(food)
            );
        }
    }
}

fn prices(food: &FoodItem) -> String {
    Portion::ALL
        .iter()
        .filter(|&&p| food.offers(p))
        .map(|&p| format!("{} {}", p, food.price(p)))
        .collect::<Vec<_>>()
        .join(" / ")
}

fn print_food(food: &FoodItem) {
    println!("{} [{}]", food.name, food.category());
    if !food.description.is_empty() {
        println!("{}", food.description);
    }
    if food.is_vegetarian {
        println!("Vegetarian");
    }
    println!("{}", prices(food));
}

fn print_cart(cart: &Cart<DocumentConnectionManager>) {
    let rows = cart.rows();
    if rows.is_empty() {
        println!("Your cart is empty");
        return;
    }
    for row in rows {
        println!(
            "{}  {}  full {} x {}  half {} x {}  = {}",
            row.line, row.name, row.full_qty, row.full_price, row.half_qty, row.half_price, row.subtotal
        );
    }
    println!("Total {}", cart.total());
}
