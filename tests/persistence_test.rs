#![cfg(feature = "storage-rocksdb")]

mod common;

use assert_cmd::cargo_bin;
use common::script;
use std::process::Command;
use tempfile::tempdir;

fn replies(output: &std::process::Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: create an invoice and authorize part of it
    let first = script(&[
        r#"{"call":"CreateInvoice","request":{"currency":"USD","line_items":[{"description":"a","amount":"100","currency":"USD"}],"idempotency_key":"inv-1"}}"#,
        r#"{"call":"AuthorizePayment","request":{"invoice_id":"@1.invoice_id","amount":"60","currency":"USD","idempotency_key":"pay-1"}}"#,
    ]);
    let output1 = Command::new(cargo_bin!("invoicepay"))
        .arg(first.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output1.status.success());
    let run1 = replies(&output1);
    let invoice_id = run1[0]["ok"]["invoice_id"].as_str().unwrap().to_string();
    let payment_id = run1[1]["ok"]["payment_id"].as_str().unwrap().to_string();

    // 2. Second run: confirm against the same database
    let confirm = format!(
        r#"{{"call":"ConfirmPayment","request":{{"payment_id":"{payment_id}","expected_version":1}}}}"#
    );
    let get = format!(r#"{{"call":"GetInvoice","request":{{"invoice_id":"{invoice_id}"}}}}"#);
    let retry = r#"{"call":"AuthorizePayment","request":{"invoice_id":"@1.invoice_id","amount":"60","currency":"USD","idempotency_key":"pay-1"}}"#;
    let replay = r#"{"call":"CreateInvoice","request":{"currency":"USD","line_items":[{"description":"a","amount":"100","currency":"USD"}],"idempotency_key":"inv-1"}}"#;
    let second = script(&[replay, retry, &confirm, &get]);

    let output2 = Command::new(cargo_bin!("invoicepay"))
        .arg(second.path())
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output2.status.success());
    let run2 = replies(&output2);

    // Idempotency records survived the restart
    assert_eq!(run2[0]["ok"]["invoice_id"], invoice_id.as_str());
    assert_eq!(run2[1]["ok"]["payment_id"], payment_id.as_str());
    assert_eq!(run2[2]["ok"]["new_invoice_status"], "partially_paid");
    assert_eq!(run2[3]["ok"]["amount_paid"], "60");
    assert_eq!(run2[3]["ok"]["version"], 3);
}
