//! Transaction example
//!
//! This example demonstrates nested transaction management:
//! - Savepoints with `save_transaction_point` / `release`
//! - Partial rollback with `rollback_to`
//! - `run_in_transaction` discarding everything on failure
//! - `TransactionGuard` rolling back when dropped
//!
//! Run with: cargo run --example transactions

use rust_sqlite_orm::impl_record;
use rust_sqlite_orm::prelude::*;

#[derive(Debug, Default, Clone)]
struct Account {
    id: i64,
    name: String,
    balance: f64,
}

impl_record!(Account, "Account", {
    id: i64 => "Id" [primary_key, auto_increment],
    name: String => "Name" [not_null],
    balance: f64 => "Balance",
});

fn transfer(conn: &Connection, from: i64, to: i64, amount: f64) -> Result<()> {
    let mut source = conn.get::<Account>(from)?;
    if source.balance < amount {
        return Err(OrmError::transaction(format!(
            "Insufficient funds: {} has {:.2}, needs {:.2}",
            source.name, source.balance, amount
        )));
    }
    let mut target = conn.get::<Account>(to)?;
    source.balance -= amount;
    target.balance += amount;
    conn.update(&source)?;
    conn.update(&target)?;
    Ok(())
}

fn print_balances(conn: &Connection) -> Result<()> {
    println!("   Balances:");
    for account in conn.table::<Account>()?.order_by("Id").to_list()? {
        println!("     {:<8} {:>8.2}", account.name, account.balance);
    }
    Ok(())
}

fn main() -> Result<()> {
    println!("=== Rust SQLite ORM - Transaction Example ===\n");

    let conn = Connection::open_in_memory()?;
    conn.create_table::<Account>(CreateFlags::NONE)?;

    let mut accounts = vec![
        Account { name: "Alice".into(), balance: 1000.0, ..Default::default() },
        Account { name: "Bob".into(), balance: 500.0, ..Default::default() },
        Account { name: "Charlie".into(), balance: 750.0, ..Default::default() },
    ];
    conn.insert_all(&mut accounts)?;
    let (alice, bob, charlie) = (accounts[0].id, accounts[1].id, accounts[2].id);
    print_balances(&conn)?;

    println!("\n1. Successful transfer (Alice -> Bob: 100)");
    conn.run_in_transaction(|c| transfer(c, alice, bob, 100.0))?;
    print_balances(&conn)?;

    println!("\n2. Failed transfer (Bob -> Alice: 1000)");
    match conn.run_in_transaction(|c| transfer(c, bob, alice, 1000.0)) {
        Ok(()) => println!("   ✓ Committed"),
        Err(e) => println!("   ✗ Rolled back: {}", e),
    }
    print_balances(&conn)?;

    println!("\n3. Nested savepoints");
    conn.begin_transaction()?;
    transfer(&conn, charlie, alice, 50.0)?;
    let savepoint = conn.save_transaction_point()?;
    println!("   Savepoint {} at depth {}", savepoint, conn.transaction_depth());
    transfer(&conn, charlie, bob, 500.0)?;
    conn.rollback_to(&savepoint)?;
    println!("   ✓ Rolled back to {}", savepoint);
    conn.commit()?;
    print_balances(&conn)?;

    println!("\n4. Guard dropped without commit");
    {
        let _tx = TransactionGuard::begin(&conn)?;
        transfer(&conn, alice, charlie, 200.0)?;
    }
    print_balances(&conn)?;

    println!("\n=== Example completed successfully ===");
    Ok(())
}
