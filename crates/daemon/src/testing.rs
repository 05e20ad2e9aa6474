//! In-memory collaborators for pipeline tests.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use engine::{DirectorInput, VideoGenerationPlan};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::genai::{
    Director, GeneratedImage, GeneratedVideo, ImageGenerator, ImageOptions, VideoGenerator,
    VideoOptions,
};
use crate::jobs::{TaskHandle, TaskKind, TaskManager, TaskTrigger};
use crate::media::{MediaAssembler, MediaMap};
use crate::orchestrator::Pipeline;
use crate::storage::{Bucket, MediaFetcher, Storage};

pub struct FakeDirector {
    pub plan: Mutex<Value>,
    pub calls: Mutex<u32>,
}

#[async_trait]
impl Director for FakeDirector {
    async fn plan(&self, _input: &DirectorInput) -> Result<Value> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.plan.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeImages {
    pub prompts: Mutex<Vec<String>>,
    pub extra_refs: Mutex<Vec<Vec<String>>>,
    /// Prompts containing this fail.
    pub fail_on: Mutex<Option<String>>,
    pub return_nothing: Mutex<bool>,
}

#[async_trait]
impl ImageGenerator for FakeImages {
    async fn generate_image_from_reference(
        &self,
        _reference_url: &str,
        prompt: &str,
        options: &ImageOptions,
        extra_reference_urls: &[String],
    ) -> Result<Vec<GeneratedImage>> {
        if let Some(needle) = self.fail_on.lock().unwrap().as_deref() {
            if prompt.contains(needle) {
                anyhow::bail!("image model unavailable");
            }
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.extra_refs.lock().unwrap().push(extra_reference_urls.to_vec());
        if *self.return_nothing.lock().unwrap() {
            return Ok(vec![]);
        }
        Ok(vec![GeneratedImage {
            bytes: Bytes::from(format!("image:{}", prompt)),
            mime_type: options.mime_type.clone(),
        }])
    }
}

#[derive(Default)]
pub struct FakeVideos {
    pub calls: Mutex<Vec<(String, String)>>,
    pub fail_on: Mutex<Option<String>>,
}

#[async_trait]
impl VideoGenerator for FakeVideos {
    async fn generate_video(
        &self,
        prompt: &str,
        source_image_url: &str,
        options: &VideoOptions,
    ) -> Result<GeneratedVideo> {
        assert_eq!(options.duration, 8);
        if let Some(needle) = self.fail_on.lock().unwrap().as_deref() {
            if prompt.contains(needle) {
                anyhow::bail!("video model quota exceeded");
            }
        }
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), source_image_url.to_string()));
        Ok(GeneratedVideo {
            bytes: Bytes::from(format!("video:{}", prompt)),
            mime_type: "video/mp4".to_string(),
        })
    }
}

/// Storage and fetcher in one. `https://cdn/...` URLs stand for catalog
/// media hosted elsewhere.
#[derive(Default)]
pub struct MemoryStorage {
    pub objects: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload(&self, bytes: Bytes, key: &str, content_type: &str) -> Result<String> {
        let bucket = Bucket::for_content_type(content_type)
            .ok_or_else(|| anyhow::anyhow!("no bucket for {}", content_type))?;
        let url = format!("mem://{}/{}", bucket.dir_name(), key);
        self.objects.lock().unwrap().insert(url.clone(), bytes);
        Ok(url)
    }
}

#[async_trait]
impl MediaFetcher for MemoryStorage {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        if let Some(bytes) = self.objects.lock().unwrap().get(url) {
            return Ok(bytes.clone());
        }
        if url.starts_with("https://cdn/") {
            return Ok(Bytes::from(format!("remote:{}", url)));
        }
        anyhow::bail!("nothing stored at {}", url)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembleCall {
    pub clip_count: usize,
    pub veo_calls: Vec<String>,
    pub demos: Vec<String>,
    pub existing_clips: Vec<String>,
}

#[derive(Default)]
pub struct FakeAssembler {
    pub calls: Mutex<Vec<AssembleCall>>,
}

fn sorted_keys(map: &MediaMap) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

#[async_trait]
impl MediaAssembler for FakeAssembler {
    async fn assemble(
        &self,
        plan: &VideoGenerationPlan,
        veo_clip_map: &MediaMap,
        demo_map: &MediaMap,
        existing_clip_map: &MediaMap,
    ) -> Result<Bytes> {
        self.calls.lock().unwrap().push(AssembleCall {
            clip_count: plan.clips.len(),
            veo_calls: sorted_keys(veo_clip_map),
            demos: sorted_keys(demo_map),
            existing_clips: sorted_keys(existing_clip_map),
        });
        Ok(Bytes::from_static(b"final-video"))
    }
}

pub struct FailingTrigger;

impl TaskTrigger for FailingTrigger {
    fn trigger(&self, kind: TaskKind, _payload: Value) -> Result<TaskHandle> {
        anyhow::bail!("task queue unreachable while triggering {}", kind)
    }
}

pub struct TestPipeline {
    pub db: Arc<Database>,
    pub tasks: Arc<TaskManager>,
    pub pipeline: Pipeline,
    pub director: Arc<FakeDirector>,
    pub images: Arc<FakeImages>,
    pub videos: Arc<FakeVideos>,
    pub storage: Arc<MemoryStorage>,
    pub assembler: Arc<FakeAssembler>,
}

impl TestPipeline {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let tasks = Arc::new(TaskManager::new(db.clone()));
        Self::with_trigger(db, tasks.clone(), tasks)
    }

    /// Same fakes, but every trigger fails.
    pub fn with_failing_trigger() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let tasks = Arc::new(TaskManager::new(db.clone()));
        Self::with_trigger(db, tasks, Arc::new(FailingTrigger))
    }

    fn with_trigger(db: Arc<Database>, tasks: Arc<TaskManager>, trigger: Arc<dyn TaskTrigger>) -> Self {
        let director = Arc::new(FakeDirector {
            plan: Mutex::new(valid_plan_json()),
            calls: Mutex::new(0),
        });
        let images = Arc::new(FakeImages::default());
        let videos = Arc::new(FakeVideos::default());
        let storage = Arc::new(MemoryStorage::default());
        let assembler = Arc::new(FakeAssembler::default());
        let pipeline = Pipeline {
            db: db.clone(),
            tasks: trigger,
            director: director.clone(),
            images: images.clone(),
            videos: videos.clone(),
            storage: storage.clone(),
            fetcher: storage.clone(),
            assembler: assembler.clone(),
        };
        TestPipeline {
            db,
            tasks,
            pipeline,
            director,
            images,
            videos,
            storage,
            assembler,
        }
    }
}

/// A product with two images, one avatar, one demo and one existing clip.
pub fn seed_catalog(db: &Database) -> (i64, i64) {
    let product = db
        .create_product(
            "Glow Serum",
            Some("$32"),
            Some("Vitamin C face serum"),
            &["Glass skin in a week".to_string()],
            &["https://cdn/serum-front.png".to_string(), "https://cdn/serum-box.png".to_string()],
        )
        .unwrap();
    let avatar = db.create_avatar("Maya", "https://cdn/maya.png").unwrap();
    db.create_demo("demo_1", product, "applying two drops", Some("https://cdn/demo_1.mp4"))
        .unwrap();
    db.create_existing_clip("clip_x", product, "bottle on a shelf", 5.0, "broll", Some("https://cdn/clip_x.mp4"))
        .unwrap();
    (product, avatar)
}

/// A valid 16s handheld plan: one composite, two calls, a demo cut.
pub fn valid_plan_json() -> Value {
    json!({
        "productInteraction": "handheld",
        "interactionReasoning": "A small serum bottle is naturally held up to the camera.",
        "totalDuration": 16,
        "imageGeneration": [
            {
                "compositeId": "composite_1",
                "avatarSource": "AVATAR_1",
                "productSources": [0],
                "prompt": "Maya holding the serum bottle at chest height",
                "description": "avatar with serum"
            }
        ],
        "segments": [
            {
                "segmentIndex": 0,
                "type": "talking_head",
                "veoCallId": "call_1",
                "startTime": 0,
                "endTime": 8,
                "script": "I tried every serum out there and this is the one that finally made my skin glow"
            },
            {
                "segmentIndex": 1,
                "type": "demo_broll",
                "veoCallId": "call_2",
                "startTime": 0,
                "endTime": 4,
                "demoId": "demo_1",
                "demoTimestamp": 2
            },
            {
                "segmentIndex": 2,
                "type": "talking_head",
                "veoCallId": "call_2",
                "startTime": 4,
                "endTime": 8,
                "script": "Two drops every morning, that is all it takes"
            }
        ],
        "veoCalls": [
            {
                "callId": "call_1",
                "sourceImageType": "composite",
                "sourceImageRef": "composite_1",
                "prompt": "Maya speaks warmly while holding the serum"
            },
            {
                "callId": "call_2",
                "sourceImageType": "avatar",
                "sourceImageRef": "AVATAR_1",
                "prompt": "Maya smiles and explains her routine"
            }
        ],
        "clips": [
            { "clipId": "clip_1", "veoCallId": "call_1", "startTime": 0, "endTime": 8, "order": 0 },
            { "clipId": "clip_2", "veoCallId": "call_2", "startTime": 0, "endTime": 4, "order": 1 },
            { "clipId": "clip_3", "veoCallId": "call_2", "startTime": 4, "endTime": 8, "order": 2 }
        ]
    })
}
