/// Ingest and retrieval service
///
/// Ties the pipeline, the store and the optional index together and owns
/// the write ordering: every rung is stored before the derivative set is
/// recorded, and the set is recorded before success is reported. If any
/// step fails nothing is recorded; objects already written for that ingest
/// are harmless orphans that nothing refers to.

use image::DynamicImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::identity::Identifier;
use crate::index::{DerivativeSet, MetadataIndex};
use crate::pipeline::{Codec, JpegCodec, NearestResampler, Pipeline, RungName};
use crate::store::{PutOutcome, Store};

/// Stored bytes plus the headers they are served with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Served {
    pub id: Identifier,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub cache_control: String,
}

#[derive(Clone)]
pub struct DerivativeService {
    store: Arc<Store>,
    index: Option<Arc<dyn MetadataIndex>>,
    pipeline: Pipeline,
    schema_version: u16,
    cache_control: String,
}

impl DerivativeService {
    pub fn new(store: Arc<Store>, index: Option<Arc<dyn MetadataIndex>>, config: &StoreConfig) -> Self {
        let pipeline = Pipeline::new(
            config.ladder.clone(),
            Arc::new(JpegCodec::new(config.jpeg_quality)),
            Arc::new(NearestResampler),
        )
        .with_sample(config.persist_color_sample);

        Self {
            store,
            index,
            pipeline,
            schema_version: config.schema_version,
            cache_control: config.cache_control(),
        }
    }

    /// Swap in a different pipeline (custom codec or resampler)
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Ingest on a blocking worker thread
    pub async fn ingest(&self, bytes: Vec<u8>) -> Result<DerivativeSet> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.ingest_bytes(&bytes)).await?
    }

    /// Decode `bytes` and ingest the result
    pub fn ingest_bytes(&self, bytes: &[u8]) -> Result<DerivativeSet> {
        if bytes.is_empty() {
            return Err(Error::InvalidImage("empty upload".into()));
        }
        let image = self
            .pipeline
            .codec()
            .decode(bytes)
            .map_err(|e| Error::InvalidImage(format!("unable to decode image: {}", e)))?;
        self.ingest_image(image)
    }

    /// Generate, store and record the derivative family of `image`
    pub fn ingest_image(&self, image: DynamicImage) -> Result<DerivativeSet> {
        let started = Instant::now();
        let (source_width, source_height) = (image.width(), image.height());

        let generated = self.pipeline.generate(image)?;
        let color_tag = generated.color_tag;
        let identified = generated.identify(self.schema_version)?;

        let mut original = None;
        let mut rungs = BTreeMap::new();
        let mut written = 0usize;

        // Data before metadata: every put must succeed before the set exists
        for item in &identified {
            if self.store.put(&item.id, &item.bytes)? == PutOutcome::Written {
                written += 1;
            }
            match item.rung {
                RungName::Original => original = Some(item.id),
                rung => {
                    rungs.insert(rung, item.id);
                }
            }
        }

        let original = original
            .ok_or_else(|| Error::InvalidImage("pipeline produced no original".into()))?;
        let set = DerivativeSet {
            original,
            color_tag,
            rungs,
        };

        let set = match &self.index {
            Some(index) => {
                index.record_derivative_set(&set)?;
                // An earlier ingest under another ladder wins; report what is indexed
                match index.find_set(&set.original)? {
                    Some(stored) if stored != set => {
                        warn!(
                            original = %set.original,
                            indexed = stored.rungs.len(),
                            generated = set.rungs.len(),
                            "original already indexed with a different family"
                        );
                        stored
                    }
                    _ => set,
                }
            }
            None => set,
        };

        info!(
            original = %set.original,
            color = %color_tag,
            width = source_width,
            height = source_height,
            written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingest complete"
        );
        Ok(set)
    }

    /// Bytes of a stored object by identifier
    pub fn fetch(&self, id: &Identifier) -> Result<Served> {
        match self.store.get(id)? {
            Some(bytes) => Ok(Served {
                id: *id,
                bytes,
                content_type: self.pipeline.codec().content_type(),
                cache_control: self.cache_control.clone(),
            }),
            None => Err(Error::NotFound(*id)),
        }
    }

    /// Identifier of one rung of an original's family
    pub fn lookup(&self, original: &Identifier, rung: RungName) -> Result<Identifier> {
        let index = self.require_index()?;
        index
            .lookup_derivative(original, rung)?
            .ok_or(Error::NotFound(*original))
    }

    /// Bytes of one rung of an original's family
    pub fn fetch_rung(&self, original: &Identifier, rung: RungName) -> Result<Served> {
        let id = self.lookup(original, rung)?;
        self.fetch(&id).map_err(|e| {
            if matches!(e, Error::NotFound(_)) {
                // The index only records stored objects, so this is damage
                warn!(original = %original, rung = %rung, id = %id, "indexed object missing from store");
            }
            e
        })
    }

    /// The whole family an identifier belongs to
    pub fn family(&self, id: &Identifier) -> Result<DerivativeSet> {
        self.require_index()?.find_set(id)?.ok_or(Error::NotFound(*id))
    }

    fn require_index(&self) -> Result<&Arc<dyn MetadataIndex>> {
        self.index
            .as_ref()
            .ok_or_else(|| Error::Config("no metadata index configured".into()))
    }
}

impl std::fmt::Debug for DerivativeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivativeService")
            .field("root", &self.store.root())
            .field("has_index", &self.index.is_some())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SqliteIndex;
    use crate::pipeline::tests::{reference_pipeline, test_image, FailingCodec};
    use crate::pipeline::Ladder;
    use crate::store::tests::{fresh_store, shared_store};
    use std::collections::HashSet;

    fn jpeg_upload(width: u32, height: u32) -> Vec<u8> {
        JpegCodec::default().encode(&test_image(width, height)).unwrap()
    }

    fn service_with_index(store: Store) -> (DerivativeService, Arc<SqliteIndex>) {
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        let dyn_index: Arc<dyn MetadataIndex> = index.clone();
        let service = DerivativeService::new(Arc::new(store), Some(dyn_index), &StoreConfig::default());
        (service, index)
    }

    fn decoded_dimensions(bytes: &[u8]) -> (u32, u32) {
        let img = JpegCodec::default().decode(bytes).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn test_ingest_reference_upload() {
        let (service, _index) = service_with_index(shared_store());
        let set = service.ingest_bytes(&jpeg_upload(638, 401)).unwrap();

        assert_eq!((set.original.width, set.original.height), (638, 401));
        let dims: Vec<(RungName, u32, u32)> = set
            .rungs
            .iter()
            .map(|(rung, id)| (*rung, id.width, id.height))
            .collect();
        assert_eq!(
            dims,
            vec![
                (RungName::Large, 400, 252),
                (RungName::Medium, 200, 126),
                (RungName::Small, 100, 63),
            ]
        );

        assert!(set.identifiers().all(|id| id.color_tag == set.color_tag));
        let hashes: HashSet<_> = set.identifiers().map(|id| id.content_hash).collect();
        assert_eq!(hashes.len(), 4);

        let small = service.fetch(&set.rungs[&RungName::Small]).unwrap();
        assert_eq!(decoded_dimensions(&small.bytes), (100, 63));
        assert_eq!(small.content_type, "image/jpeg");
        assert_eq!(small.cache_control, "public, max-age=2592000, immutable");
    }

    #[test]
    fn test_identical_uploads_give_identical_identifiers() {
        let (service, index) = service_with_index(shared_store());
        let upload = jpeg_upload(320, 200);

        let first = service.ingest_bytes(&upload).unwrap();
        let second = service.ingest_bytes(&upload).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.original.to_string(), second.original.to_string());
        assert_eq!(index.set_count().unwrap(), 1);
    }

    #[test]
    fn test_every_recorded_identifier_resolves() {
        let (service, _index) = service_with_index(shared_store());
        let set = service.ingest_bytes(&jpeg_upload(500, 700)).unwrap();

        for id in set.identifiers() {
            let served = service.fetch(id).unwrap();
            assert_eq!(crate::identity::content_hash(&served.bytes), id.content_hash);
        }
        for rung in [RungName::Original, RungName::Large, RungName::Medium, RungName::Small] {
            let served = service.fetch_rung(&set.original, rung).unwrap();
            assert_eq!(Some(served.id), set.get(rung));
        }
    }

    #[test]
    fn test_family_from_any_member() {
        let (service, _index) = service_with_index(shared_store());
        let set = service.ingest_bytes(&jpeg_upload(240, 240)).unwrap();
        let small = set.rungs[&RungName::Small];
        assert_eq!(service.family(&small).unwrap(), set);
    }

    #[test]
    fn test_never_stored_identifier_is_not_found() {
        let (service, _index) = service_with_index(shared_store());
        let id: Identifier = "0001_0000000000000000000000000000000000000000_000000_100_63"
            .parse()
            .unwrap();
        assert!(matches!(service.fetch(&id), Err(Error::NotFound(_))));
        assert!(matches!(
            service.fetch_rung(&id, RungName::Small),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_garbage_upload_is_invalid_image() {
        let (service, index) = service_with_index(shared_store());
        assert!(matches!(service.ingest_bytes(b"GIF89a but not really"), Err(Error::InvalidImage(_))));
        assert!(matches!(service.ingest_bytes(&[]), Err(Error::InvalidImage(_))));
        assert_eq!(index.set_count().unwrap(), 0);
    }

    #[test]
    fn test_encode_failure_records_nothing() {
        let (service, index) = service_with_index(shared_store());
        let failing = Pipeline::new(
            Ladder::reference(),
            Arc::new(FailingCodec { fail_at_width: 100 }),
            Arc::new(NearestResampler),
        );
        let service = service.with_pipeline(failing);

        let result = service.ingest_bytes(&jpeg_upload(638, 401));
        assert!(matches!(result, Err(Error::EncodeFailed { rung: RungName::Small, .. })));
        assert_eq!(index.set_count().unwrap(), 0);
    }

    #[test]
    fn test_store_failure_records_nothing_and_retry_succeeds() {
        let (_dir, store) = fresh_store();
        let upload = jpeg_upload(638, 401);

        // Work out where the small rung will land and pull its shard away
        let source = JpegCodec::default().decode(&upload).unwrap();
        let expected = reference_pipeline().generate(source).unwrap().identify(1).unwrap();
        let small = expected.iter().find(|i| i.rung == RungName::Small).unwrap().id;
        let shard = store.layout().shard_dir(&small);
        std::fs::remove_dir(&shard).unwrap();

        let (service, index) = service_with_index(store);
        let err = service.ingest_bytes(&upload).unwrap_err();
        assert!(matches!(err, Error::StoreWriteFailed { .. }));
        assert!(err.is_retryable());
        assert_eq!(index.set_count().unwrap(), 0);

        std::fs::create_dir(&shard).unwrap();
        let set = service.ingest_bytes(&upload).unwrap();
        assert_eq!(set.rungs[&RungName::Small], small);
        assert_eq!(index.set_count().unwrap(), 1);
    }

    #[test]
    fn test_legacy_sample_is_stored_and_indexed() {
        let config = StoreConfig {
            persist_color_sample: true,
            ..StoreConfig::default()
        };
        let index: Arc<dyn MetadataIndex> = Arc::new(SqliteIndex::open_in_memory().unwrap());
        let service = DerivativeService::new(Arc::new(shared_store()), Some(index), &config);

        let set = service.ingest_bytes(&jpeg_upload(300, 150)).unwrap();
        let sample = set.rungs[&RungName::Sample];
        assert_eq!((sample.width, sample.height), (1, 1));
        assert_eq!(decoded_dimensions(&service.fetch(&sample).unwrap().bytes), (1, 1));
    }

    #[test]
    fn test_reingest_under_new_ladder_returns_indexed_family() {
        let store = Arc::new(shared_store());
        let index: Arc<dyn MetadataIndex> = Arc::new(SqliteIndex::open_in_memory().unwrap());
        let upload = jpeg_upload(330, 170);

        let plain = DerivativeService::new(Arc::clone(&store), Some(Arc::clone(&index)), &StoreConfig::default());
        let first = plain.ingest_bytes(&upload).unwrap();

        let config = StoreConfig {
            persist_color_sample: true,
            ..StoreConfig::default()
        };
        let sampling = DerivativeService::new(store, Some(index), &config);
        let second = sampling.ingest_bytes(&upload).unwrap();

        assert_eq!(second, first);
        assert!(!second.rungs.contains_key(&RungName::Sample));
        assert!(matches!(
            sampling.lookup(&second.original, RungName::Sample),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_lookup_without_index_is_a_config_error() {
        let service = DerivativeService::new(Arc::new(shared_store()), None, &StoreConfig::default());
        let set = service.ingest_bytes(&jpeg_upload(120, 90)).unwrap();

        assert!(service.fetch(&set.original).is_ok());
        assert!(matches!(
            service.lookup(&set.original, RungName::Small),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_ingests_agree() {
        let (service, index) = service_with_index(shared_store());
        let upload = jpeg_upload(410, 330);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let upload = upload.clone();
                tokio::spawn(async move { service.ingest(upload).await })
            })
            .collect();

        let mut sets = Vec::new();
        for handle in handles {
            sets.push(handle.await.unwrap().unwrap());
        }
        assert!(sets.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(index.set_count().unwrap(), 1);
    }
}
