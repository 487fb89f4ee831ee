// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::*;

#[tokio::test]
async fn flag_is_level_triggered() {
    let flag = Flag::new();
    flag.set();
    // A waiter arriving after the set still proceeds.
    tokio::time::timeout(Duration::from_millis(100), flag.wait()).await.unwrap();
    assert!(flag.consume());
    assert!(!flag.consume(), "draining is idempotent");
}

#[tokio::test]
async fn flag_wakes_parked_waiter() {
    let flag = Arc::new(Flag::new());
    let waiter = {
        let flag = Arc::clone(&flag);
        tokio::spawn(async move { flag.wait().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    flag.set();
    tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
}

#[tokio::test]
async fn repeated_sets_coalesce() {
    let flag = Flag::new();
    flag.set();
    flag.set();
    flag.set();
    assert!(flag.consume());
    assert!(!flag.is_set());
}
