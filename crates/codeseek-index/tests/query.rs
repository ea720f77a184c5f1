//! Integration tests for ranked retrieval and call-graph neighbors.

use std::fs;
use std::sync::Arc;

use codeseek_core::{CodeseekError, ScanConfig};
use codeseek_index::{ActiveIndex, CodeIndex, HashEmbedder, IndexingPipeline, QueryService};

const DIM: usize = 128;

async fn indexed(files: &[(&str, &str)]) -> (tempfile::TempDir, CodeIndex) {
    let dir = tempfile::tempdir().unwrap();
    for (rel, content) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
    }
    let mut index = CodeIndex::new(DIM).unwrap();
    IndexingPipeline::new(Arc::new(HashEmbedder::new(DIM)), 16, 16)
        .index_repository(&mut index, dir.path(), &ScanConfig::default())
        .await
        .unwrap();
    (dir, index)
}

fn service(index: CodeIndex) -> QueryService {
    QueryService::new(Arc::new(index), Arc::new(HashEmbedder::new(DIM)))
}

const BILLING: &str = "\
def compute_invoice_total(items):
    subtotal = sum_line_items(items)
    return apply_tax(subtotal)


def sum_line_items(items):
    return sum(item.price for item in items)


def apply_tax(amount):
    return amount * 1.2
";

const MAILER: &str = "\
class EmailSender:
    def send_welcome_email(self, user):
        self.deliver(user.email, 'welcome')

    def deliver(self, address, template):
        smtp_send(address, template)
";

#[tokio::test]
async fn results_are_ranked_best_first() {
    let (_dir, index) = indexed(&[("billing.py", BILLING), ("mailer.py", MAILER)]).await;
    let service = service(index);

    let hits = service.query("send welcome email", 10).await.unwrap();
    assert_eq!(hits.len(), service.index().len());
    // The class chunk contains the method's text, so either may rank first.
    assert!(["send_welcome_email", "EmailSender"].contains(&hits[0].chunk.name()));
    assert!(!hits[..2].iter().any(|h| h.chunk.file_path().ends_with("billing.py")));
    for pair in hits.windows(2) {
        assert!(
            pair[0].score > pair[1].score
                || (pair[0].score == pair[1].score && pair[0].vector_id < pair[1].vector_id)
        );
    }
}

#[tokio::test]
async fn hits_carry_the_chunk_behind_their_vector() {
    let (_dir, index) = indexed(&[("billing.py", BILLING)]).await;
    let service = service(index);

    let hits = service.query("invoice total", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    for hit in &hits {
        assert_eq!(
            service.index().metadata().get(hit.vector_id).unwrap(),
            &hit.chunk
        );
    }
    assert_eq!(hits[0].chunk.name(), "compute_invoice_total");
    assert_eq!(hits[0].chunk.id(), "billing.py:compute_invoice_total:1");
}

#[tokio::test]
async fn zero_top_k_and_empty_index_return_nothing() {
    let (_dir, index) = indexed(&[("billing.py", BILLING)]).await;
    let service = service(index);
    assert!(service.query("tax", 0).await.unwrap().is_empty());

    let empty = QueryService::new(
        Arc::new(CodeIndex::new(DIM).unwrap()),
        Arc::new(HashEmbedder::new(DIM)),
    );
    assert!(empty.query("tax", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn embedder_must_match_index_dimension() {
    let (_dir, index) = indexed(&[("billing.py", BILLING)]).await;
    let service = QueryService::new(Arc::new(index), Arc::new(HashEmbedder::new(DIM / 2)));
    let err = service.query("tax", 3).await.unwrap_err();
    assert!(matches!(err, CodeseekError::EmbedDimensionMismatch { .. }), "{err}");
}

#[tokio::test]
async fn neighbors_follow_calls_in_both_directions() {
    let (_dir, index) = indexed(&[("billing.py", BILLING), ("mailer.py", MAILER)]).await;
    let service = service(index);

    let enriched = service.query_with_neighbors("invoice total", 10).await.unwrap();
    let plain = service.query("invoice total", 10).await.unwrap();
    let enriched_ids: Vec<u64> = enriched.iter().map(|e| e.hit.vector_id).collect();
    let plain_ids: Vec<u64> = plain.iter().map(|h| h.vector_id).collect();
    assert_eq!(enriched_ids, plain_ids);

    let find = |name: &str| {
        enriched
            .iter()
            .find(|e| e.hit.chunk.name() == name)
            .unwrap()
    };

    let total = find("compute_invoice_total");
    let callees: Vec<&str> = total.neighbors.callees.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(callees.len(), 2);
    assert!(callees.contains(&"sum_line_items"));
    assert!(callees.contains(&"apply_tax"));
    assert!(total.neighbors.callers.is_empty());

    let tax = find("apply_tax");
    assert_eq!(tax.neighbors.callers.len(), 1);
    assert_eq!(tax.neighbors.callers[0].name, "compute_invoice_total");
    assert_eq!(tax.neighbors.callers[0].file_path.as_path(), tax.hit.chunk.file_path());

    // `self.deliver(...)` resolves by attribute name; `smtp_send` is external.
    let welcome = find("send_welcome_email");
    assert_eq!(welcome.neighbors.callees.len(), 1);
    assert_eq!(welcome.neighbors.callees[0].name, "deliver");
    assert!(find("deliver").neighbors.callees.is_empty());
}

#[tokio::test]
async fn enriched_hits_serialize_flat() {
    let (_dir, index) = indexed(&[("billing.py", BILLING)]).await;
    let service = service(index);
    let enriched = service.query_with_neighbors("apply tax", 1).await.unwrap();

    let json = serde_json::to_value(&enriched).unwrap();
    let first = &json[0];
    assert!(first["score"].is_number());
    assert!(first["vectorId"].is_number());
    assert_eq!(first["chunk"]["name"], "apply_tax");
    assert_eq!(first["neighbors"]["callers"][0]["name"], "compute_invoice_total");
}

#[tokio::test]
async fn readers_keep_their_snapshot_across_a_swap() {
    let (_dir, first) = indexed(&[("billing.py", BILLING)]).await;
    let (_dir2, second) = indexed(&[("billing.py", BILLING), ("mailer.py", MAILER)]).await;
    let first_len = first.len();
    let second_len = second.len();

    let active = ActiveIndex::new(Arc::new(first));
    let reader = QueryService::new(active.snapshot(), Arc::new(HashEmbedder::new(DIM)));

    let old = active.swap(Arc::new(second));
    assert_eq!(old.len(), first_len);

    let hits = reader.query("send welcome email", 50).await.unwrap();
    assert_eq!(hits.len(), first_len);
    assert_eq!(active.snapshot().len(), second_len);
}

#[tokio::test]
async fn reopened_index_answers_like_the_saved_one() {
    let (_dir, mut index) = indexed(&[("billing.py", BILLING), ("mailer.py", MAILER)]).await;
    let out = tempfile::tempdir().unwrap();
    index.save(out.path()).unwrap();

    let before = service(index);
    let after = service(CodeIndex::open(out.path()).unwrap());

    let a = before.query_with_neighbors("deliver email", 4).await.unwrap();
    let b = after.query_with_neighbors("deliver email", 4).await.unwrap();
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.hit.vector_id, y.hit.vector_id);
        assert_eq!(x.hit.chunk, y.hit.chunk);
        assert_eq!(x.neighbors, y.neighbors);
    }
}
