//! Basic usage example
//!
//! This example demonstrates:
//! - Declaring a record with `impl_record!`
//! - Creating and migrating a table
//! - Inserting, updating and deleting records
//! - Filtering, ordering and paging
//!
//! Run with: cargo run --example basic_usage

use rust_sqlite_orm::impl_record;
use rust_sqlite_orm::prelude::*;

#[derive(Debug, Default, Clone)]
struct Stock {
    id: i64,
    symbol: String,
    price: f64,
    listed: Option<chrono::NaiveDateTime>,
}

impl_record!(Stock, "Stock", {
    id: i64 => "Id" [primary_key, auto_increment],
    symbol: String => "Symbol" [max_length(8), unique],
    price: f64 => "Price",
    listed: Option<chrono::NaiveDateTime> => "Listed",
});

fn main() -> Result<()> {
    println!("=== Rust SQLite ORM - Basic Usage Example ===\n");

    let conn = Connection::open_in_memory()?;

    println!("1. Creating table...");
    let created = conn.create_table::<Stock>(CreateFlags::NONE)?;
    println!("   ✓ {:?}\n", created);

    println!("2. Inserting stocks...");
    let now = chrono::Utc::now().naive_utc();
    for (symbol, price) in [("MSFT", 415.5), ("AAPL", 189.9), ("AMZN", 178.2), ("GOOG", 152.3)] {
        let mut stock = Stock {
            symbol: symbol.into(),
            price,
            listed: Some(now),
            ..Default::default()
        };
        conn.insert(&mut stock)?;
        println!("   ✓ {} -> Id {}", stock.symbol, stock.id);
    }

    println!("\n3. Querying stocks starting with 'A'...");
    let a_stocks = conn
        .table::<Stock>()?
        .filter(col("Symbol").starts_with("A"))?
        .order_by("Symbol")
        .to_list()?;
    for stock in &a_stocks {
        println!("   {} @ {:.2}", stock.symbol, stock.price);
    }

    println!("\n4. Updating a price...");
    let mut msft = conn.get_where::<Stock>(col("Symbol").eq("MSFT"))?;
    msft.price = 420.0;
    conn.update(&msft)?;
    println!("   ✓ MSFT now {:.2}", conn.get::<Stock>(msft.id)?.price);

    println!("\n5. Paging by price...");
    let page = conn
        .table::<Stock>()?
        .order_by_descending("Price")
        .skip(1)
        .take(2)
        .to_list()?;
    for stock in &page {
        println!("   {} @ {:.2}", stock.symbol, stock.price);
    }

    println!("\n6. Deleting cheap stocks...");
    let removed = conn.table::<Stock>()?.delete(col("Price").lt(160.0))?;
    println!("   ✓ Removed {} row(s)", removed);
    println!("   Remaining: {}", conn.table::<Stock>()?.count()?);

    println!("\n=== Example completed successfully ===");
    Ok(())
}
