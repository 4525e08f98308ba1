use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use glob::{glob_with, MatchOptions};
use sha2::{Digest, Sha256};

use crate::config::AppConfig;
use crate::embedding::Embedder;
use crate::models::{IndexRequest, IndexStatus, IndexedDocument, SourceDocument};
use crate::registry::Registry;
use crate::vector_store::{QdrantPoint, QdrantStore};

pub const NO_DOCUMENTS_MESSAGE: &str = "No documents found.";

const UPSERT_BATCH: usize = 64;

#[derive(Clone)]
pub struct Indexer {
    config: AppConfig,
    registry: Registry,
    embedder: Embedder,
    store: QdrantStore,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub total_files: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub removed: usize,
    pub message: String,
}

/// What a run has to do once the registry has been consulted.
#[derive(Debug, Default)]
pub struct IndexPlan {
    pub to_index: Vec<SourceDocument>,
    pub skipped: usize,
    pub removed: Vec<String>,
}

impl Indexer {
    pub fn new(
        config: AppConfig,
        registry: Registry,
        embedder: Embedder,
        store: QdrantStore,
    ) -> Self {
        Self {
            config,
            registry,
            embedder,
            store,
        }
    }

    pub async fn index<F>(
        &self,
        job_id: &str,
        request: IndexRequest,
        mut progress: F,
    ) -> Result<IndexReport>
    where
        F: FnMut(IndexStatus) + Send,
    {
        let mut status = IndexStatus::started(job_id);
        status.status = "running".to_string();
        self.advance(&mut status, "collecting", &mut progress).await?;

        let pattern = self.config.docs_glob.clone();
        let paths = tokio::task::spawn_blocking(move || collect_documents(&pattern))
            .await
            .context("document collection task panicked")??;
        status.total_files = paths.len() as i64;

        if paths.is_empty() {
            tracing::warn!(pattern = %self.config.docs_glob, "no documents matched");
            status.status = "completed".to_string();
            status.message = Some(NO_DOCUMENTS_MESSAGE.to_string());
            self.advance(&mut status, "done", &mut progress).await?;
            return Ok(IndexReport {
                message: NO_DOCUMENTS_MESSAGE.to_string(),
                ..IndexReport::default()
            });
        }

        self.advance(&mut status, "hashing", &mut progress).await?;
        let mut documents = Vec::with_capacity(paths.len());
        for path in &paths {
            let document = read_document(path).await?;
            if document.text.trim().is_empty() {
                tracing::warn!(path = %path.display(), "skipping empty document");
                continue;
            }
            documents.push(document);
        }

        let collection = self.store.collection().to_string();
        let registered = if request.rebuild {
            HashMap::new()
        } else if self.store.sync_collection(self.embedder.dimension()).await? {
            tracing::info!(%collection, "collection was missing, re-embedding every document");
            self.registry.clear_documents(&collection).await?;
            HashMap::new()
        } else {
            self.registry.document_hashes(&collection).await?
        };
        let plan = plan_index(documents, &registered, request.rebuild, request.prune);
        status.skipped_count = plan.skipped as i64;

        self.advance(&mut status, "embedding_and_upserting", &mut progress)
            .await?;
        if request.rebuild {
            tracing::info!(%collection, "rebuilding collection");
            self.store
                .recreate_collection(self.embedder.dimension())
                .await?;
            self.registry.clear_documents(&collection).await?;
        }

        for batch in plan.to_index.chunks(UPSERT_BATCH) {
            let texts: Vec<String> = batch.iter().map(|doc| doc.text.clone()).collect();
            let vectors = self
                .embedder
                .embed_batch(texts)
                .await
                .with_context(|| format!("failed embedding batch starting at {}", batch[0].id))?;

            let points: Vec<QdrantPoint> = batch
                .iter()
                .zip(vectors)
                .map(|(doc, vector)| QdrantPoint::for_document(&doc.id, &doc.text, vector))
                .collect();
            self.store.upsert_points(&points).await?;

            let now = Utc::now();
            let records: Vec<IndexedDocument> = batch
                .iter()
                .map(|doc| IndexedDocument {
                    collection: collection.clone(),
                    id: doc.id.clone(),
                    source: doc.id.clone(),
                    content_hash: doc.content_hash.clone(),
                    byte_len: doc.byte_len(),
                    indexed_at: now,
                })
                .collect();
            self.registry.upsert_documents(&records).await?;

            status.indexed_count += batch.len() as i64;
            status.updated_at = Utc::now();
            progress(status.clone());
        }

        if !plan.removed.is_empty() {
            self.advance(&mut status, "pruning", &mut progress).await?;
            self.store.delete_documents(&plan.removed).await?;
            self.registry
                .delete_documents(&collection, &plan.removed)
                .await?;
            status.removed_count = plan.removed.len() as i64;
        }

        let message = format!(
            "Indexed {} docs into {} at {}",
            status.indexed_count,
            collection,
            self.store.base_url()
        );
        tracing::info!(
            indexed = status.indexed_count,
            skipped = status.skipped_count,
            removed = status.removed_count,
            "{message}"
        );

        status.status = "completed".to_string();
        status.message = Some(message.clone());
        self.advance(&mut status, "done", &mut progress).await?;

        Ok(IndexReport {
            total_files: paths.len(),
            indexed: status.indexed_count as usize,
            skipped: plan.skipped,
            removed: plan.removed.len(),
            message,
        })
    }

    async fn advance<F>(&self, status: &mut IndexStatus, stage: &str, progress: &mut F) -> Result<()>
    where
        F: FnMut(IndexStatus) + Send,
    {
        status.stage = stage.to_string();
        status.updated_at = Utc::now();
        progress(status.clone());
        self.registry.upsert_index_status(status).await
    }
}

/// Regular files matching `pattern`, sorted by path. Wildcards do not match
/// a leading dot, so hidden files are only picked up when named explicitly.
pub fn collect_documents(pattern: &str) -> Result<Vec<PathBuf>> {
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let mut paths: Vec<PathBuf> = glob_with(pattern, options)
        .with_context(|| format!("invalid document glob: {pattern}"))?
        .filter_map(Result::ok)
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

pub async fn read_document(path: &Path) -> Result<SourceDocument> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed reading document: {}", path.display()))?;
    let content_hash = sha256_hex(&bytes);
    let text = String::from_utf8(bytes)
        .with_context(|| format!("document is not valid UTF-8: {}", path.display()))?;

    Ok(SourceDocument {
        id: path.to_string_lossy().into_owned(),
        text,
        content_hash,
    })
}

/// Splits the collected documents into work and skips. Unchanged documents
/// are skipped unless `rebuild` is set; with `prune`, registered ids that
/// were not collected this time are scheduled for removal.
pub fn plan_index(
    documents: Vec<SourceDocument>,
    registered: &HashMap<String, String>,
    rebuild: bool,
    prune: bool,
) -> IndexPlan {
    let seen: HashSet<String> = documents.iter().map(|doc| doc.id.clone()).collect();

    let mut plan = IndexPlan::default();
    for doc in documents {
        let unchanged = registered
            .get(&doc.id)
            .is_some_and(|hash| *hash == doc.content_hash);
        if unchanged && !rebuild {
            plan.skipped += 1;
        } else {
            plan.to_index.push(doc);
        }
    }

    if prune && !rebuild {
        plan.removed = registered
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        plan.removed.sort();
    }

    plan
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{temp_registry, test_config, test_embedder, StubQdrant};
    use std::fs;
    use tempfile::TempDir;

    fn doc(id: &str, hash: &str) -> SourceDocument {
        SourceDocument {
            id: id.to_string(),
            text: format!("contents of {id}"),
            content_hash: hash.to_string(),
        }
    }

    fn registered(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(id, hash)| (id.to_string(), hash.to_string()))
            .collect()
    }

    #[test]
    fn unchanged_documents_are_skipped() {
        let plan = plan_index(
            vec![doc("a.txt", "h1"), doc("b.txt", "h2"), doc("c.txt", "h3")],
            &registered(&[("a.txt", "h1"), ("b.txt", "old")]),
            false,
            false,
        );

        assert_eq!(plan.skipped, 1);
        let ids: Vec<&str> = plan.to_index.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b.txt", "c.txt"]);
        assert!(plan.removed.is_empty());
    }

    #[test]
    fn rebuild_indexes_everything() {
        let plan = plan_index(
            vec![doc("a.txt", "h1")],
            &registered(&[("a.txt", "h1"), ("gone.txt", "h9")]),
            true,
            true,
        );

        assert_eq!(plan.skipped, 0);
        assert_eq!(plan.to_index.len(), 1);
        assert!(plan.removed.is_empty());
    }

    #[test]
    fn prune_schedules_vanished_documents() {
        let plan = plan_index(
            vec![doc("a.txt", "h1")],
            &registered(&[("a.txt", "h1"), ("z.txt", "h2"), ("m.txt", "h3")]),
            false,
            true,
        );

        assert_eq!(plan.skipped, 1);
        assert_eq!(plan.removed, vec!["m.txt".to_string(), "z.txt".to_string()]);
    }

    #[test]
    fn collect_sorts_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_luggage.txt"), "Two bags.").unwrap();
        fs::write(dir.path().join("a_refunds.md"), "Seven days.").unwrap();
        fs::create_dir(dir.path().join("archive")).unwrap();

        let pattern = format!("{}/*", dir.path().display());
        let paths = collect_documents(&pattern).unwrap();

        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_refunds.md", "b_luggage.txt"]);
    }

    #[test]
    fn collect_skips_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("refunds.txt"), "Seven days.").unwrap();
        fs::write(dir.path().join(".DS_Store"), [0xff, 0xfe, 0x00]).unwrap();
        fs::write(dir.path().join(".refunds.txt.swp"), "partial").unwrap();

        let pattern = format!("{}/*", dir.path().display());
        let paths = collect_documents(&pattern).unwrap();

        assert_eq!(paths, vec![dir.path().join("refunds.txt")]);
    }

    #[test]
    fn collect_on_empty_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*", dir.path().display());
        assert!(collect_documents(&pattern).unwrap().is_empty());
    }

    #[test]
    fn invalid_glob_is_an_error() {
        assert!(collect_documents("data/[").is_err());
    }

    #[tokio::test]
    async fn read_document_hashes_and_keys_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faq.txt");
        fs::write(&path, "abc").unwrap();

        let document = read_document(&path).await.unwrap();
        assert_eq!(document.id, path.to_string_lossy());
        assert_eq!(document.text, "abc");
        assert_eq!(
            document.content_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(document.byte_len(), 3);
    }

    #[tokio::test]
    async fn read_document_rejects_non_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.bin");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let err = read_document(&path).await.unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    fn indexer_for(
        docs: &TempDir,
        stub: &StubQdrant,
        registry: &Registry,
        collection: &str,
    ) -> Indexer {
        let config = test_config(docs.path(), &stub.base_url, collection);
        let store = QdrantStore::new(stub.base_url.clone(), collection);
        Indexer::new(config, registry.clone(), test_embedder(), store)
    }

    async fn run(indexer: &Indexer, request: IndexRequest) -> (IndexReport, Vec<String>) {
        let mut stages = Vec::new();
        let report = indexer
            .index("job-test", request, |status| stages.push(status.stage))
            .await
            .unwrap();
        stages.dedup();
        (report, stages)
    }

    fn file_names(ids: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut names: Vec<String> = ids
            .into_iter()
            .map(|id| {
                Path::new(&id)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn empty_glob_reports_no_documents_and_leaves_store_alone() {
        let docs = tempfile::tempdir().unwrap();
        let stub = StubQdrant::start().await;
        let (_db, registry) = temp_registry().await;
        let indexer = indexer_for(&docs, &stub, &registry, "travel");

        let request = IndexRequest {
            rebuild: false,
            prune: true,
        };
        let (report, stages) = run(&indexer, request).await;

        assert_eq!(report.message, NO_DOCUMENTS_MESSAGE);
        assert_eq!(report.total_files, 0);
        assert_eq!((report.indexed, report.skipped, report.removed), (0, 0, 0));
        assert_eq!(stages, vec!["collecting", "done"]);
        assert!(stub.calls().is_empty());

        let job = registry.get_index_status("job-test").await.unwrap().unwrap();
        assert_eq!(job.status, "completed");
        assert_eq!(job.message.as_deref(), Some(NO_DOCUMENTS_MESSAGE));
    }

    #[tokio::test]
    async fn incremental_run_walks_every_stage_and_prunes() {
        let docs = tempfile::tempdir().unwrap();
        fs::write(docs.path().join("refunds.txt"), "Refunds within 7 days.").unwrap();
        fs::write(docs.path().join("luggage.txt"), "Two bags per passenger.").unwrap();
        fs::write(docs.path().join("pets.md"), "Small pets in carriers.").unwrap();
        let stub = StubQdrant::start().await;
        let (_db, registry) = temp_registry().await;
        let indexer = indexer_for(&docs, &stub, &registry, "travel");

        let (first, _) = run(&indexer, IndexRequest::default()).await;
        assert_eq!(first.indexed, 3);
        assert!(first.message.starts_with("Indexed 3 docs into travel at http://127.0.0.1:"));

        fs::remove_file(docs.path().join("pets.md")).unwrap();
        fs::write(docs.path().join("luggage.txt"), "One bag per passenger.").unwrap();

        let request = IndexRequest {
            rebuild: false,
            prune: true,
        };
        let (second, stages) = run(&indexer, request).await;
        assert_eq!(
            stages,
            vec!["collecting", "hashing", "embedding_and_upserting", "pruning", "done"]
        );
        assert_eq!(second.total_files, 2);
        assert_eq!((second.indexed, second.skipped, second.removed), (1, 1, 1));
        assert_eq!(second.message, format!("Indexed 1 docs into travel at {}", stub.base_url));

        assert_eq!(
            file_names(stub.doc_ids("travel").unwrap()),
            vec!["luggage.txt", "refunds.txt"]
        );
        let registered = registry.list_documents("travel").await.unwrap();
        assert_eq!(
            file_names(registered.into_iter().map(|doc| doc.id)),
            vec!["luggage.txt", "refunds.txt"]
        );
    }

    #[tokio::test]
    async fn rebuild_recreates_collection_and_clears_registry() {
        let docs = tempfile::tempdir().unwrap();
        fs::write(docs.path().join("refunds.txt"), "Refunds within 7 days.").unwrap();
        fs::write(docs.path().join("wifi.txt"), "Free wifi on board.").unwrap();
        let stub = StubQdrant::start().await;
        let (_db, registry) = temp_registry().await;
        let indexer = indexer_for(&docs, &stub, &registry, "travel");

        run(&indexer, IndexRequest::default()).await;
        fs::remove_file(docs.path().join("wifi.txt")).unwrap();

        let request = IndexRequest {
            rebuild: true,
            prune: false,
        };
        let (report, stages) = run(&indexer, request).await;
        assert_eq!(stages, vec!["collecting", "hashing", "embedding_and_upserting", "done"]);
        assert_eq!((report.indexed, report.skipped, report.removed), (1, 0, 0));
        assert!(stub.calls().contains(&"DROP travel".to_string()));

        assert_eq!(file_names(stub.doc_ids("travel").unwrap()), vec!["refunds.txt"]);
        let registered = registry.list_documents("travel").await.unwrap();
        assert_eq!(file_names(registered.into_iter().map(|doc| doc.id)), vec!["refunds.txt"]);
    }

    #[tokio::test]
    async fn unchanged_documents_are_reindexed_into_a_new_collection() {
        let docs = tempfile::tempdir().unwrap();
        fs::write(docs.path().join("refunds.txt"), "Refunds within 7 days.").unwrap();
        fs::write(docs.path().join("luggage.txt"), "Two bags per passenger.").unwrap();
        let stub = StubQdrant::start().await;
        let (_db, registry) = temp_registry().await;

        let first = indexer_for(&docs, &stub, &registry, "travel_v1");
        run(&first, IndexRequest::default()).await;

        let second = indexer_for(&docs, &stub, &registry, "travel_v2");
        let (report, _) = run(&second, IndexRequest::default()).await;
        assert_eq!((report.indexed, report.skipped), (2, 0));
        assert_eq!(stub.doc_ids("travel_v2").unwrap().len(), 2);

        let (again, _) = run(&second, IndexRequest::default()).await;
        assert_eq!((again.indexed, again.skipped), (0, 2));
    }

    #[tokio::test]
    async fn lost_collection_is_recreated_and_refilled() {
        let docs = tempfile::tempdir().unwrap();
        fs::write(docs.path().join("refunds.txt"), "Refunds within 7 days.").unwrap();
        let stub = StubQdrant::start().await;
        let (_db, registry) = temp_registry().await;
        let indexer = indexer_for(&docs, &stub, &registry, "travel");

        run(&indexer, IndexRequest::default()).await;
        stub.wipe();

        let (report, _) = run(&indexer, IndexRequest::default()).await;
        assert_eq!((report.indexed, report.skipped), (1, 0));
        assert_eq!(file_names(stub.doc_ids("travel").unwrap()), vec!["refunds.txt"]);
    }
}
