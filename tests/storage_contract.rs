//! Behaviour every storage engine must share, exercised through the
//! `ExpenseStore` facade. PostgreSQL runs only when
//! `SPENDLOG_TEST_POSTGRES_URL` points at a scratch database.

use std::{collections::BTreeMap, sync::Arc};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::macros::date;
use uuid::Uuid;

use spendlog::{
    participants::{contributions, AppMode, Participants},
    postgres_storage::PostgresStorage,
    sqlite_storage::SqliteStorage,
    storage::InMemoryStorage,
    store::ExpenseStore,
};
use spendlog_core::{Category, NewExpense, YearMonth};

fn memory_store() -> Option<ExpenseStore> {
    Some(ExpenseStore::new(Arc::new(InMemoryStorage::new())))
}

fn sqlite_store() -> Option<ExpenseStore> {
    let storage = SqliteStorage::new(":memory:").expect("open sqlite");
    Some(ExpenseStore::new(Arc::new(storage)))
}

fn postgres_store() -> Option<ExpenseStore> {
    let url = std::env::var("SPENDLOG_TEST_POSTGRES_URL").ok()?;
    let storage = PostgresStorage::new(&url).expect("connect postgres");
    Some(ExpenseStore::new(Arc::new(storage)))
}

/// Owners are unique per test so a shared database never leaks rows between tests.
fn fresh_owner() -> String {
    format!("owner-{}", Uuid::new_v4())
}

fn ym(year: i32, month: u8) -> YearMonth {
    YearMonth::new(year, month).unwrap()
}

fn budget_upsert_is_idempotent(store: &ExpenseStore) {
    let owner = fresh_owner();
    let mut budgets = BTreeMap::new();
    budgets.insert(Category::Groceries, dec!(800));
    assert!(store.save_category_budgets(&owner, &budgets));

    budgets.insert(Category::Groceries, dec!(950.50));
    assert!(store.save_category_budgets(&owner, &budgets));
    assert!(store.save_category_budgets(&owner, &budgets));

    let loaded = store.load_category_budgets(&owner, &Category::ALL);
    assert_eq!(loaded[&Category::Groceries], dec!(950.50));
    assert_eq!(loaded.len(), Category::ALL.len());
}

fn setting_upsert_is_idempotent(store: &ExpenseStore) {
    let owner = fresh_owner();
    assert!(store.save_setting(&owner, "person1_name", "Ana"));
    assert!(store.save_setting(&owner, "person1_name", "Ana Maria"));
    assert_eq!(store.load_setting(&owner, "person1_name", "Pessoa 1"), "Ana Maria");
    assert_eq!(store.load_setting(&owner, "person2_name", "Pessoa 2"), "Pessoa 2");
}

fn monthly_filter_respects_boundaries(store: &ExpenseStore) {
    let owner = fresh_owner();
    let rows = [
        ("jan last day", date!(2023 - 01 - 31)),
        ("feb first day", date!(2023 - 02 - 01)),
        ("feb last day", date!(2023 - 02 - 28)),
        ("mar first day", date!(2023 - 03 - 01)),
        ("feb next year", date!(2024 - 02 - 10)),
    ];
    for (description, day) in rows {
        let expense = NewExpense::new(description, dec!(10), Category::Other).on(day);
        assert!(store.add_expense(&owner, &expense).success);
    }

    let february = store.monthly_expenses(&owner, ym(2023, 2));
    let mut names: Vec<&str> = february.expenses.iter().map(|e| e.description.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["feb first day", "feb last day"]);
    assert!(february.expenses.iter().all(|e| ym(2023, 2).contains(e.date)));
    assert!(february.expenses[0].date >= february.expenses[1].date);
}

fn monthly_total_is_the_sum(store: &ExpenseStore) {
    let owner = fresh_owner();
    let amounts = [dec!(12.34), dec!(0.01), dec!(1999.99), dec!(45)];
    for (i, amount) in amounts.iter().enumerate() {
        let expense = NewExpense::new(format!("item {}", i), *amount, Category::Bills).on(date!(2023 - 05 - 10));
        assert!(store.add_expense(&owner, &expense).success);
    }

    let monthly = store.monthly_expenses(&owner, ym(2023, 5));
    let summed: Decimal = monthly.expenses.iter().map(|e| e.amount).sum();
    assert_eq!(monthly.total, summed);
    assert_eq!(monthly.total, dec!(2057.34));

    let empty = store.monthly_expenses(&owner, ym(2023, 6));
    assert!(empty.is_empty());
    assert_eq!(empty.total, Decimal::ZERO);
}

fn delete_is_owner_scoped(store: &ExpenseStore) {
    let alice = fresh_owner();
    let bob = fresh_owner();
    let month = ym(2023, 7);
    let expense = NewExpense::new("cinema", dec!(30), Category::Leisure).on(date!(2023 - 07 - 04));
    assert!(store.add_expense(&alice, &expense).success);
    let id = store.monthly_expenses(&alice, month).expenses[0].id;

    assert!(!store.delete_expense(&bob, id));
    assert_eq!(store.monthly_expenses(&alice, month).expenses.len(), 1);
    assert!(store.monthly_expenses(&bob, month).is_empty());
    assert!(store.distinct_months(&bob).is_empty());

    assert!(store.delete_expense(&alice, id));
    assert!(!store.delete_expense(&alice, id));
}

fn split_contributions_add_up(store: &ExpenseStore) {
    let owner = fresh_owner();
    let couple = Participants {
        mode: AppMode::Casal,
        person1: "Ana".to_string(),
        person2: "Bruno".to_string(),
    };
    assert!(couple.save(store, &owner));

    let day = date!(2023 - 08 - 15);
    let rows = [
        NewExpense::new("rent", dec!(1500), Category::Housing).on(day).paid_by("Ana").split(dec!(100), dec!(0)),
        NewExpense::new("fuel", dec!(210.40), Category::Car).on(day).paid_by("Bruno").split(dec!(0), dec!(100)),
        NewExpense::new("market", dec!(333.33), Category::Groceries).on(day).paid_by("Ambos").split(dec!(40), dec!(60)),
    ];
    for row in &rows {
        assert!(store.add_expense(&owner, row).success);
    }

    let invalid = NewExpense::new("bad split", dec!(10), Category::Other).on(day).paid_by("Ambos").split(dec!(40), dec!(40));
    assert!(!store.add_expense(&owner, &invalid).success);

    let monthly = store.monthly_expenses(&owner, ym(2023, 8));
    for e in &monthly.expenses {
        if let (Some(s1), Some(s2)) = (e.split_person1, e.split_person2) {
            assert_eq!(s1 + s2, dec!(100));
        }
    }

    let loaded = Participants::load(store, &owner);
    assert_eq!(loaded, couple);
    let c = contributions(&monthly.expenses, &loaded);
    assert_eq!(c.unassigned, Decimal::ZERO);
    assert_eq!(c.person1.amount + c.person2.amount, monthly.total);
    assert_eq!(c.person1.amount, dec!(1633.332));
}

fn default_budgets_are_zero(store: &ExpenseStore) {
    let owner = fresh_owner();
    let budgets = store.load_category_budgets(&owner, &Category::ALL);
    assert_eq!(budgets.keys().copied().collect::<Vec<_>>(), {
        let mut all = Category::ALL.to_vec();
        all.sort();
        all
    });
    assert!(budgets.values().all(|v| v.is_zero()));
}

fn add_query_delete_scenario(store: &ExpenseStore) {
    let owner = fresh_owner();
    let month = YearMonth::current();

    let outcome = store.add_expense(&owner, &NewExpense::new("coffee", dec!(7.90), Category::Leisure));
    assert!(outcome.success, "{}", outcome.message);

    let monthly = store.monthly_expenses(&owner, month);
    assert_eq!(monthly.expenses.len(), 1);
    let row = &monthly.expenses[0];
    assert_eq!(row.description, "coffee");
    assert_eq!(row.amount, dec!(7.90));
    assert_eq!(row.category, Category::Leisure);
    assert_eq!(row.owner, owner);
    assert_eq!(store.distinct_months(&owner), vec![month]);

    assert!(store.delete_expense(&owner, row.id));
    assert!(store.monthly_expenses(&owner, month).is_empty());
    assert!(store.distinct_months(&owner).is_empty());
}

fn distinct_months_most_recent_first(store: &ExpenseStore) {
    let owner = fresh_owner();
    for day in [date!(2022 - 11 - 03), date!(2023 - 02 - 14), date!(2022 - 11 - 20), date!(2023 - 01 - 01)] {
        assert!(store.add_expense(&owner, &NewExpense::new("x", dec!(1), Category::Other).on(day)).success);
    }
    assert_eq!(store.distinct_months(&owner), vec![ym(2023, 2), ym(2023, 1), ym(2022, 11)]);
}

fn initialize_is_idempotent(store: &ExpenseStore) {
    let owner = fresh_owner();
    assert!(store.initialize());
    let expense = NewExpense::new("book", dec!(55), Category::Education).on(date!(2023 - 09 - 09));
    assert!(store.add_expense(&owner, &expense).success);
    assert!(store.initialize());
    assert!(store.initialize());
    assert_eq!(store.monthly_expenses(&owner, ym(2023, 9)).expenses.len(), 1);
}

fn duplicate_registration_fails_generically(store: &ExpenseStore) {
    let username = fresh_owner();
    let email = format!("{}@example.com", username);
    assert!(store.add_user(&username, "First", &email, "pw-1").success);

    let same_username = store.add_user(&username, "Second", &format!("other-{}", email), "pw-2");
    let same_email = store.add_user(&format!("{}-2", username), "Third", &email, "pw-3");
    for outcome in [&same_username, &same_email] {
        assert!(!outcome.success);
        assert!(outcome.message.contains("may already exist"), "{}", outcome.message);
    }

    let users: Vec<_> = store
        .fetch_all_users()
        .into_iter()
        .filter(|u| u.email == email || u.username.starts_with(&username))
        .collect();
    assert_eq!(users.len(), 1);
    assert_ne!(users[0].password_hash, "pw-1");
    assert!(store.verify_credentials(&username, "pw-1").is_some());
}

macro_rules! contract_tests {
    ($engine:ident: $($property:ident),+ $(,)?) => {
        paste::paste! {
            $(
                #[test]
                fn [<test_ $engine _ $property>]() {
                    match [<$engine _store>]() {
                        Some(store) => $property(&store),
                        None => eprintln!("skipping {}: engine not configured", stringify!($engine)),
                    }
                }
            )+
        }
    };
}

macro_rules! all_engines {
    ($($engine:ident),+) => {
        $(
            contract_tests!($engine:
                budget_upsert_is_idempotent,
                setting_upsert_is_idempotent,
                monthly_filter_respects_boundaries,
                monthly_total_is_the_sum,
                delete_is_owner_scoped,
                split_contributions_add_up,
                default_budgets_are_zero,
                add_query_delete_scenario,
                distinct_months_most_recent_first,
                initialize_is_idempotent,
                duplicate_registration_fails_generically,
            );
        )+
    };
}

all_engines!(memory, sqlite, postgres);
