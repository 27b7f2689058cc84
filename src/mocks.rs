// In-memory fakes of every collaborator trait, for unit tests.
// Each fake records its calls and can be switched into a failing mode.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::attachments::{AttachmentOutcome, AttachmentStore};
use crate::classifier::Classifier;
use crate::error::{ApiError, ClassifierError, GatewayError};
use crate::gateway::MessageGateway;
use crate::ledger::RemoteSheet;
use crate::transaction::{AttachmentReference, Classification};

fn exhausted(service: &'static str) -> ApiError {
    ApiError::Exhausted {
        service,
        attempts: 3,
        last: Box::new(ApiError::Timeout),
    }
}

// ============================================================================
// GATEWAY
// ============================================================================

pub struct FakeGateway {
    sent: Mutex<Vec<(String, String)>>,
    fail_sends: AtomicBool,
    fail_media: AtomicBool,
}

impl Default for FakeGateway {
    fn default() -> Self {
        FakeGateway {
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            fail_media: AtomicBool::new(false),
        }
    }
}

impl FakeGateway {
    /// Every (target, text) pair sent, in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, target: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(t, _)| t == target)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_media(&self, fail: bool) {
        self.fail_media.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageGateway for FakeGateway {
    async fn send(&self, target: &str, text: &str) -> Result<(), GatewayError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(GatewayError::Send {
                target: target.to_string(),
                source: exhausted("gateway"),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), text.to_string()));
        Ok(())
    }

    async fn fetch_media(&self, _url: &str) -> Result<Vec<u8>, GatewayError> {
        if self.fail_media.load(Ordering::SeqCst) {
            return Err(GatewayError::Media(exhausted("gateway-media")));
        }
        Ok(b"JPEGDATA".to_vec())
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

#[derive(Clone)]
enum Answer {
    Ok(Classification),
    Malformed,
    Unavailable,
}

pub struct FakeClassifier {
    answer: Mutex<Answer>,
    /// Overrides `answer` for image requests when set.
    image_answer: Mutex<Option<Answer>>,
    calls: AtomicUsize,
    image_calls: AtomicUsize,
}

impl FakeClassifier {
    pub fn answering(classification: Classification) -> Self {
        Self::with(Answer::Ok(classification))
    }

    pub fn malformed() -> Self {
        Self::with(Answer::Malformed)
    }

    pub fn unavailable() -> Self {
        Self::with(Answer::Unavailable)
    }

    fn with(answer: Answer) -> Self {
        FakeClassifier {
            answer: Mutex::new(answer),
            image_answer: Mutex::new(None),
            calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
        }
    }

    /// Answer image requests with `classification` regardless of the text answer.
    pub fn reading_image(self, classification: Classification) -> Self {
        *self.image_answer.lock().unwrap() = Some(Answer::Ok(classification));
        self
    }

    /// Text-only calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }
}

fn reply(answer: Answer) -> Result<Classification, ClassifierError> {
    match answer {
        Answer::Ok(classification) => Ok(classification),
        Answer::Malformed => Err(ClassifierError::Malformed("not json".to_string())),
        Answer::Unavailable => Err(ClassifierError::Unavailable(exhausted("classifier"))),
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(&self, _text: &str) -> Result<Classification, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answer.lock().unwrap().clone();
        reply(answer)
    }

    async fn classify_with_image(
        &self,
        _text: &str,
        _image: &[u8],
        _mime_type: &str,
    ) -> Result<Classification, ClassifierError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .image_answer
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| self.answer.lock().unwrap().clone());
        reply(answer)
    }
}

// ============================================================================
// SPREADSHEET
// ============================================================================

#[derive(Default)]
pub struct FakeSheet {
    rows: Mutex<Vec<Vec<String>>>,
    fail_appends: AtomicBool,
    fail_reads: AtomicBool,
    reads: AtomicUsize,
}

impl FakeSheet {
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().unwrap().clone()
    }

    /// Insert a row directly, bypassing the failure switches.
    pub fn push_raw(&self, row: Vec<String>) {
        self.rows.lock().unwrap().push(row);
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSheet for FakeSheet {
    async fn append_row(&self, row: Vec<String>) -> Result<(), ApiError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(exhausted("spreadsheet"));
        }
        self.rows.lock().unwrap().push(row);
        Ok(())
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>, ApiError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(exhausted("spreadsheet"));
        }
        Ok(self.rows())
    }
}

// ============================================================================
// ATTACHMENTS
// ============================================================================

#[derive(Default)]
pub struct FakeAttachments {
    degraded: AtomicBool,
    uploads: Mutex<Vec<String>>,
}

impl FakeAttachments {
    pub fn degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }

    /// Filenames passed to `upload`, in order.
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttachmentStore for FakeAttachments {
    async fn upload(&self, _bytes: Vec<u8>, filename: &str) -> AttachmentOutcome {
        let index = {
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push(filename.to_string());
            uploads.len()
        };

        if self.degraded.load(Ordering::SeqCst) {
            return AttachmentOutcome::Degraded {
                reason: "file-storage unavailable after 3 attempts".to_string(),
            };
        }

        let file_id = format!("file-{index}");
        AttachmentOutcome::Stored(AttachmentReference {
            url: crate::attachments::view_url(&file_id),
            file_id,
        })
    }
}
