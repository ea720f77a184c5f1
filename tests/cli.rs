use std::path::Path;
use std::process::{Command, Output};

fn codeseek(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_codeseek"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("OPENAI_API_KEY")
        .env_remove("VOYAGE_API_KEY")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "codeseek failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).unwrap()
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

const ORDERS: &str = "\
def place_order(cart):
    total = price_cart(cart)
    print(total)
    return total


def price_cart(cart):
    return sum(cart)
";

const INVENTORY: &str = "\
class Warehouse:
    def restock(self, item, count):
        self.adjust(item, count)

    def adjust(self, item, delta):
        log_change(item, delta)
";

fn sample_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), ".codeseek.toml", "[embedding]\ndimensions = 64\n");
    write(dir.path(), "shop/orders.py", ORDERS);
    write(dir.path(), "shop/inventory.py", INVENTORY);
    dir
}

#[test]
fn no_subcommand_prints_usage() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout(&codeseek(dir.path(), &[]));
    assert!(out.contains("codeseek index"));
    assert!(out.contains("codeseek search"));
}

#[test]
fn chunks_lists_definitions_and_calls() {
    let dir = sample_repo();
    let out = stdout(&codeseek(dir.path(), &["chunks", "shop/orders.py"]));

    assert!(out.contains("place_order"));
    assert!(out.contains("orders.py:place_order:1"));
    assert!(out.contains("resolved: price_cart"));
    assert!(out.contains("external: print"));
}

#[test]
fn chunks_json_reports_resolved_and_external_calls() {
    let dir = sample_repo();
    let out = stdout(&codeseek(
        dir.path(),
        &["chunks", "shop/inventory.py", "--format", "json"],
    ));

    let rows: serde_json::Value = serde_json::from_str(&out).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 3);

    let kinds: Vec<&str> = rows.iter().map(|r| r["kind"].as_str().unwrap()).collect();
    assert_eq!(kinds.iter().filter(|k| **k == "class").count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == "method").count(), 2);

    let restock = rows.iter().find(|r| r["name"] == "restock").unwrap();
    assert_eq!(restock["resolvedCalls"], serde_json::json!(["adjust"]));
    let adjust = rows.iter().find(|r| r["name"] == "adjust").unwrap();
    assert_eq!(adjust["externalCalls"], serde_json::json!(["log_change"]));
}

#[test]
fn chunks_rejects_missing_and_broken_files() {
    let dir = sample_repo();
    assert!(!codeseek(dir.path(), &["chunks", "shop/absent.py"]).status.success());

    write(dir.path(), "shop/broken.py", "def broken(:\n    pass\n");
    let output = codeseek(dir.path(), &["chunks", "shop/broken.py"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("parse error"));
}

#[test]
fn search_before_index_explains_what_to_do() {
    let dir = sample_repo();
    let output = codeseek(dir.path(), &["search", "price"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no index found"));
}

#[test]
fn remote_provider_without_key_fails_with_help() {
    let dir = sample_repo();
    write(dir.path(), ".codeseek.toml", "[embedding]\nprovider = \"voyage\"\n");
    let output = codeseek(dir.path(), &["index"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("VOYAGE_API_KEY"));
}

#[test]
fn index_search_and_stats() {
    let dir = sample_repo();

    let out = stdout(&codeseek(dir.path(), &["index", "--format", "json"]));
    let summary: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(summary["filesScanned"], 2);
    assert_eq!(summary["chunksIndexed"], 5);
    assert_eq!(summary["failedBatches"], serde_json::json!([]));
    let generation = summary["generation"].as_str().unwrap().to_string();
    assert!(dir.path().join(".codeseek/index/CURRENT").exists());

    let out = stdout(&codeseek(
        dir.path(),
        &["search", "price cart", "--limit", "2", "--format", "json"],
    ));
    let hits: serde_json::Value = serde_json::from_str(&out).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["chunk"]["name"], "price_cart");
    assert!(hits[0]["score"].as_f64().unwrap() >= hits[1]["score"].as_f64().unwrap());

    let out = stdout(&codeseek(
        dir.path(),
        &["search", "price cart", "--limit", "5", "--neighbors", "--format", "json"],
    ));
    let hits: serde_json::Value = serde_json::from_str(&out).unwrap();
    let price = hits
        .as_array()
        .unwrap()
        .iter()
        .find(|h| h["chunk"]["name"] == "price_cart")
        .unwrap();
    assert_eq!(price["neighbors"]["callers"][0]["name"], "place_order");

    let out = stdout(&codeseek(dir.path(), &["stats", "--format", "json"]));
    let stats: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(stats["totalChunks"], 5);
    assert_eq!(stats["totalFiles"], 2);
    assert_eq!(stats["functions"], 2);
    assert_eq!(stats["classes"], 1);
    assert_eq!(stats["methods"], 2);
    assert_eq!(stats["dimension"], 64);
    assert_eq!(stats["generation"], generation.as_str());

    let text = stdout(&codeseek(dir.path(), &["search", "restock warehouse"]));
    assert!(text.contains("restock") || text.contains("Warehouse"));
}

#[test]
fn index_out_writes_elsewhere() {
    let dir = sample_repo();
    let out_dir = tempfile::tempdir().unwrap();
    let out_path = out_dir.path().join("idx");

    stdout(&codeseek(
        dir.path(),
        &["index", "--out", out_path.to_str().unwrap()],
    ));
    assert!(out_path.join("CURRENT").exists());
    assert!(!dir.path().join(".codeseek").exists());
}

#[test]
fn log_dir_receives_a_log_file() {
    let repo = sample_repo();
    let output = codeseek(repo.path(), &["index", "--log-dir", "logs"]);
    stdout(&output);

    let logs: Vec<_> = std::fs::read_dir(repo.path().join("logs"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(logs.len(), 1);
    let name = logs[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("codeseek-") && name.ends_with(".log"), "{name}");

    let content = std::fs::read_to_string(&logs[0]).unwrap();
    assert!(content.contains("saved index generation"), "{content}");
    // Info lines go to the file, not to stderr.
    assert!(!String::from_utf8_lossy(&output.stderr).contains("saved index generation"));
}
