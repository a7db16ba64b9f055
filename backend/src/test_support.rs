//! Fixtures shared by the unit and route tests.

use bytes::Bytes;
use chrono::Duration as TokenDuration;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use jsonwebtoken::Algorithm;
use ndarray::Array4;
use neumo_shared::RegisterRequest;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::auth::jwt::{JwtService, JwtSettings};
use crate::auth::password::PasswordManager;
use crate::auth::service::AuthService;
use crate::db::UserRepository;
use crate::db::memory_repository::MemoryRepository;
use crate::db::models::{NewUser, PatientContext, Prediction, User};
use crate::imaging::{ImageIntake, PreprocessConfig, UploadedImage};
use crate::inference::{Classifier, InferenceEngine, InferenceError, ModelLoader};
use crate::predictions::PredictionService;
use crate::storage::memory_blob_store::MemoryBlobStore;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

/// A smooth radial gradient, roughly the shape of a chest film.
pub fn xray_jpeg(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let img = RgbImage::from_fn(width, height, |x, y| {
        let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt() / cx.max(cy);
        let v = (255.0 * (1.0 - d.min(1.0))) as u8;
        let v = v.wrapping_add(seed);
        Rgb([v, v, v])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

/// Film with per-pixel grain. Grain barely compresses, so a 256x256 film
/// encodes to roughly 50 KB.
pub fn grainy_xray_jpeg(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state >> 24) as u8
    };
    let img = RgbImage::from_fn(width, height, |_, _| Rgb([next(), next(), next()]));
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg)
}

pub fn gray_png(width: u32, height: u32, value: u8) -> Vec<u8> {
    let img = GrayImage::from_pixel(width, height, Luma([value]));
    encode(DynamicImage::ImageLuma8(img), ImageFormat::Png)
}

pub fn jpeg_upload(file_name: &str) -> UploadedImage {
    UploadedImage::new(
        file_name,
        Some("image/jpeg".to_string()),
        Bytes::from(xray_jpeg(96, 96, 0)),
    )
}

pub struct FixedLogits(pub Vec<f32>);

impl Classifier for FixedLogits {
    fn logits(&self, _input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        Ok(self.0.clone())
    }
}

pub struct SlowClassifier(pub Duration);

impl Classifier for SlowClassifier {
    fn logits(&self, _input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        std::thread::sleep(self.0);
        Ok(vec![0.0, 0.0])
    }
}

/// Loader that counts invocations; `failing()` never produces a model.
pub struct CountingLoader {
    pub calls: AtomicUsize,
    model: Option<Arc<dyn Classifier>>,
}

impl CountingLoader {
    pub fn new(classifier: impl Classifier + 'static) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            model: Some(Arc::new(classifier)),
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            model: None,
        }
    }
}

impl ModelLoader for CountingLoader {
    fn load(&self) -> Result<Arc<dyn Classifier>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which concurrent callers could race.
        std::thread::sleep(Duration::from_millis(20));
        self.model
            .clone()
            .ok_or_else(|| InferenceError::ModelLoad("model file not found".to_string()))
    }
}

pub fn jwt_service() -> JwtService {
    JwtService::new(&JwtSettings {
        secret: "test-secret".to_string(),
        algorithm: Algorithm::HS256,
        access_ttl: TokenDuration::minutes(30),
        refresh_ttl: TokenDuration::days(30),
    })
}

pub fn auth_service(repo: &MemoryRepository) -> AuthService {
    AuthService::new(Arc::new(repo.clone()), jwt_service(), PasswordManager::fast())
}

pub fn register_request(email: &str, username: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        username: username.to_string(),
        password: "password123".to_string(),
        full_name: None,
    }
}

/// Prediction service wired to in-memory stores and a fixed classifier
/// that favours PNEUMONIA.
pub struct Harness {
    pub repo: MemoryRepository,
    pub blobs: MemoryBlobStore,
    pub loader: Arc<CountingLoader>,
    pub engine: Arc<InferenceEngine>,
    pub service: Arc<PredictionService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_loader(Arc::new(CountingLoader::new(FixedLogits(vec![-0.4, 1.1]))))
    }

    pub fn with_loader(loader: Arc<CountingLoader>) -> Self {
        let repo = MemoryRepository::new();
        Self::build(repo.clone(), repo, loader)
    }

    /// Users resolve through the harness repository while predictions are
    /// written to `predictions`.
    pub fn with_prediction_store(predictions: MemoryRepository) -> Self {
        let loader = Arc::new(CountingLoader::new(FixedLogits(vec![-0.4, 1.1])));
        Self::build(MemoryRepository::new(), predictions, loader)
    }

    fn build(repo: MemoryRepository, predictions: MemoryRepository, loader: Arc<CountingLoader>) -> Self {
        let blobs = MemoryBlobStore::new();
        let engine = Arc::new(InferenceEngine::new(loader.clone(), Duration::from_secs(10)));
        let service = Arc::new(PredictionService::new(
            Arc::new(predictions),
            Arc::new(repo.clone()),
            Arc::new(blobs.clone()),
            engine.clone(),
            ImageIntake::new(MAX_UPLOAD_BYTES, PreprocessConfig::default()),
            Duration::from_secs(3600),
            Duration::from_secs(10),
        ));
        Self {
            repo,
            blobs,
            loader,
            engine,
            service,
        }
    }

    pub async fn user(&self, username: &str) -> User {
        self.repo
            .create_user(NewUser {
                email: format!("{}@example.com", username),
                username: username.to_string(),
                full_name: None,
                hashed_password: "not-a-real-hash".to_string(),
            })
            .await
            .unwrap()
    }

    pub async fn create(&self, user_id: i64) -> Prediction {
        self.service
            .create_prediction(user_id, jpeg_upload("chest.jpg"), PatientContext::default())
            .await
            .unwrap()
    }
}
