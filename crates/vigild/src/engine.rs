//! Engine thread that owns the access pipeline and its ONNX session.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use vigil_core::detector::DetectorError;
use vigil_core::{
    AccessLogSink, AccessPipeline, EnrolledIdentity, EnrollmentRequest, FaceDetector, FaceLocator,
    Gallery, IdentificationDecision, MediaStore, PipelineError, ScrfdDetector,
};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        image: Vec<u8>,
        request: EnrollmentRequest,
        reply: oneshot::Sender<Result<EnrolledIdentity, PipelineError>>,
    },
    Identify {
        image: Vec<u8>,
        threshold: Option<f32>,
        location: String,
        reply: oneshot::Sender<Result<IdentificationDecision, PipelineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Enroll the face in `image` as a new identity.
    pub async fn enroll(
        &self,
        image: Vec<u8>,
        request: EnrollmentRequest,
    ) -> Result<EnrolledIdentity, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                image,
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Identify the face in `image` and log the attempt.
    pub async fn identify(
        &self,
        image: Vec<u8>,
        threshold: Option<f32>,
        location: String,
    ) -> Result<IdentificationDecision, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify {
                image,
                threshold,
                location,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Load the SCRFD model and assemble the pipeline around the given stores.
///
/// Fails fast if the model is missing or unloadable.
pub fn load_pipeline(
    config: &Config,
    gallery: Arc<dyn Gallery>,
    access_log: Arc<dyn AccessLogSink>,
    media: Arc<dyn MediaStore>,
) -> Result<AccessPipeline<ScrfdDetector>, EngineError> {
    let model_path = config.scrfd_model_path();
    let detector = ScrfdDetector::load(&model_path)?;
    tracing::info!(path = %model_path.display(), "SCRFD detector loaded");

    Ok(AccessPipeline::new(
        FaceLocator::new(detector, config.locator_config()),
        gallery,
        access_log,
        media,
        config.pipeline_config(),
    ))
}

/// Spawn the engine on a dedicated OS thread that owns `pipeline` (and with
/// it the detector session) for the lifetime of the daemon.
pub fn spawn_engine<D>(mut pipeline: AccessPipeline<D>) -> Result<EngineHandle, EngineError>
where
    D: FaceDetector + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("vigil-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll {
                        image,
                        request,
                        reply,
                    } => {
                        let result = pipeline.enroll(&image, request);
                        log_failure("enroll", &result);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Identify {
                        image,
                        threshold,
                        location,
                        reply,
                    } => {
                        let result = pipeline.identify(&image, threshold, &location);
                        log_failure("identify", &result);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn log_failure<T>(operation: &str, result: &Result<T, PipelineError>) {
    match result {
        Err(err) if err.is_domain_outcome() => tracing::info!(operation, outcome = %err),
        Err(err) => tracing::error!(operation, error = %err, "request failed"),
        Ok(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{
        AccessLogEntry, BoundingBox, Category, LocatorConfig, MemoryGallery, PipelineConfig,
        SinkError,
    };
    use vigil_imaging::Frame;

    /// One face in the middle of any frame that is not a single flat colour.
    struct CenterDetector;

    impl FaceDetector for CenterDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
            if frame.data.iter().all(|&p| p == frame.data[0]) {
                return Ok(vec![]);
            }
            let (w, h) = (frame.width as f32, frame.height as f32);
            Ok(vec![BoundingBox {
                x: w * 0.25,
                y: h * 0.2,
                width: w * 0.5,
                height: h * 0.6,
                confidence: 0.95,
            }])
        }
    }

    struct NoopSink;

    impl AccessLogSink for NoopSink {
        fn record(&self, _: &AccessLogEntry) -> Result<(), SinkError> {
            Ok(())
        }
    }

    impl MediaStore for NoopSink {
        fn store_reference_photo(&self, id: &str, _: &[u8]) -> Result<String, SinkError> {
            Ok(id.to_string())
        }

        fn store_access_image(&self, reference: &str, _: &[u8]) -> Result<String, SinkError> {
            Ok(reference.to_string())
        }
    }

    fn engine() -> (EngineHandle, Arc<MemoryGallery>) {
        let gallery = Arc::new(MemoryGallery::new());
        let pipeline = AccessPipeline::new(
            FaceLocator::new(CenterDetector, LocatorConfig::default()),
            gallery.clone(),
            Arc::new(NoopSink),
            Arc::new(NoopSink),
            PipelineConfig::default(),
        );
        (spawn_engine(pipeline).unwrap(), gallery)
    }

    fn encode(img: image::GrayImage) -> Vec<u8> {
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    fn portrait() -> Vec<u8> {
        encode(image::GrayImage::from_fn(120, 150, |x, y| {
            let (fx, fy) = (x as f32 - 60.0, y as f32 - 75.0);
            let v = if (fx / 30.0).powi(2) + (fy / 45.0).powi(2) > 1.0 {
                30
            } else if fy < -10.0 && fy > -20.0 && (fx.abs() - 12.0).abs() < 5.0 {
                20
            } else {
                150 + ((x * 3 + y * 7) % 60) as u8
            };
            image::Luma([v])
        }))
    }

    fn request(name: &str) -> EnrollmentRequest {
        EnrollmentRequest {
            display_name: name.into(),
            category: Category::Visitor,
            is_authorized: true,
            external_reference: None,
        }
    }

    #[tokio::test]
    async fn test_enroll_then_identify_through_engine() {
        let (engine, gallery) = engine();
        let image = portrait();

        let enrolled = engine.enroll(image.clone(), request("Ana")).await.unwrap();
        assert_eq!(gallery.len(), 1);

        let decision = engine
            .identify(image, None, "Side Gate".into())
            .await
            .unwrap();
        assert!(decision.access_granted);
        assert_eq!(decision.matched_identity_id, Some(enrolled.identity_id));
    }

    #[tokio::test]
    async fn test_domain_outcomes_come_back_as_pipeline_errors() {
        let (engine, _gallery) = engine();
        let blank = encode(image::GrayImage::from_pixel(80, 80, image::Luma([90])));

        let err = engine.enroll(blank.clone(), request("Nobody")).await.unwrap_err();
        assert!(matches!(err, EngineError::Pipeline(PipelineError::NoFaceDetected)));

        let err = engine.identify(portrait(), None, String::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Pipeline(PipelineError::GalleryEmpty)));
    }

    #[tokio::test]
    async fn test_handle_clones_share_one_worker() {
        let (engine, gallery) = engine();
        let other = engine.clone();
        engine.enroll(portrait(), request("Ana")).await.unwrap();
        let err = other.enroll(portrait(), request("Ana twin")).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Pipeline(PipelineError::DuplicateEnrollment { .. })
        ));
        assert_eq!(gallery.len(), 1);
    }
}
