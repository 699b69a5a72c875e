//! End-to-end signing against a mock signing service.

mod common;

use common::{sha256_hex, skip_if_no_shell, stderr, stdout, Workspace, TEMPLATE};

fn signed_workspace() -> Workspace {
    let ws = Workspace::new();
    ws.write_template(TEMPLATE);
    ws.write_contract(&sha256_hex(TEMPLATE.as_bytes()));
    ws
}

fn sign(ws: &Workspace, counterparty: &str, signatory: &str, key: &str) {
    let output = ws.run(&[
        "sign",
        "contract.toml",
        "--counterparty",
        counterparty,
        "--signatory",
        signatory,
        "--key-id",
        key,
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
}

#[test]
fn every_signatory_signed_verifies() {
    if skip_if_no_shell() {
        return;
    }
    let ws = signed_workspace();
    sign(&ws, "client", "client_sig01", "clientsig");
    sign(&ws, "supplier", "supplier_sig01", "suppliersig");
    assert!(ws.path().join("client__client_sig01.sig").is_file());
    assert!(ws.path().join("supplier__supplier_sig01.sig").is_file());

    let output = ws.run(&["verify", "contract.toml"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("ok client/client_sig01 (clientsig)"));
    assert!(out.contains("ok supplier/supplier_sig01 (suppliersig)"));
    assert!(out.contains("verified 2 signature(s)"));
}

#[test]
fn missing_signature_is_the_only_problem_reported() {
    if skip_if_no_shell() {
        return;
    }
    let ws = signed_workspace();
    sign(&ws, "client", "client_sig01", "clientsig");

    let output = ws.run(&["verify", "contract.toml"]);
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("1 problem(s)"), "stderr: {err}");
    assert!(err.contains("supplier/supplier_sig01: missing signature file"));
    assert!(!err.contains("client/client_sig01:"));
}

#[test]
fn editing_a_signed_contract_invalidates_signatures() {
    if skip_if_no_shell() {
        return;
    }
    let ws = signed_workspace();
    sign(&ws, "client", "client_sig01", "clientsig");
    sign(&ws, "supplier", "supplier_sig01", "suppliersig");

    let path = ws.contract_path();
    let text = std::fs::read_to_string(&path).expect("read contract");
    std::fs::write(&path, text.replace("1 January 2020", "2 January 2020")).expect("write");

    let output = ws.run(&["verify", "contract.toml"]);
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("2 problem(s)"), "stderr: {err}");
    assert!(err.contains("bad signature for clientsig"));
}

#[test]
fn signing_with_the_wrong_key_fails_verification() {
    if skip_if_no_shell() {
        return;
    }
    let ws = signed_workspace();
    sign(&ws, "client", "client_sig01", "someone-else");
    sign(&ws, "supplier", "supplier_sig01", "suppliersig");

    let output = ws.run(&["verify", "contract.toml"]);
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("1 problem(s)"), "stderr: {err}");
    assert!(err.contains("client/client_sig01"));
}

#[test]
fn unknown_signatory_cannot_sign() {
    let ws = signed_workspace();
    let output = ws.run(&[
        "sign",
        "contract.toml",
        "--counterparty",
        "client",
        "--signatory",
        "nobody",
    ]);
    assert!(!output.status.success());
    assert!(!ws.path().join("client__nobody.sig").exists());
}
