// Classifier Client - free text -> (category, signed amount, note) via LLM
// Plus the naive amount extractor used when the model is unavailable

use async_trait::async_trait;
use base64::Engine as _;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ApiError, ClassifierError};
use crate::resilient::ResilientClient;
use crate::transaction::{Category, Classification, MAX_AMOUNT};

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError>;

    /// Classify a photographed receipt together with its caption (possibly empty).
    async fn classify_with_image(
        &self,
        text: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<Classification, ClassifierError>;
}

const INSTRUCTION_PROMPT: &str = r#"Kamu adalah asisten pencatat keuangan pribadi untuk seorang bos dan bendaharanya.
Baca pesan transaksi dan tentukan jenisnya:
- "expense": uang keluar (beli, bayar, makan, bensin, parkir, rokok, belanja)
- "income": uang masuk (gaji, terima, dapat, masuk)
- "transfer": perpindahan dana (tf, transfer, top up, kirim dana)

Jawab HANYA dengan JSON:
{"category": "expense|income|transfer", "amount": <angka>, "note": "<keterangan singkat>"}

Aturan "amount": angka rupiah tanpa titik atau simbol; negatif bila uang keluar,
positif bila uang masuk. "50rb" = 50000, "1,5jt" = 1500000.

Contoh:
Pesan: "beli rokok 25000"
{"category": "expense", "amount": -25000, "note": "beli rokok"}
Pesan: "tf dari bos 1000000"
{"category": "transfer", "amount": 1000000, "note": "transfer dari bos"}"#;

// ============================================================================
// GEMINI WIRE TYPES
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    Image { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// The JSON object the prompt asks the model for
#[derive(Deserialize)]
struct ModelAnswer {
    category: String,
    amount: serde_json::Value,
    #[serde(default)]
    note: String,
}

// ============================================================================
// GEMINI CLASSIFIER
// ============================================================================

pub struct GeminiClassifier {
    client: ResilientClient,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClassifier {
    pub fn new(client: ResilientClient, base_url: &str, model: &str, api_key: &str) -> Self {
        GeminiClassifier {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn build_request(text: &str) -> GenerateRequest {
        Self::request_with_parts(vec![RequestPart::Text {
            text: format!("{INSTRUCTION_PROMPT}\n\nPesan: \"{}\"", text.trim()),
        }])
    }

    fn build_image_request(text: &str, image: &[u8], mime_type: &str) -> GenerateRequest {
        Self::request_with_parts(vec![
            RequestPart::Text {
                text: format!(
                    "{INSTRUCTION_PROMPT}\n\nPesan: \"{}\"\n\nBaca juga nominal pada foto nota yang dilampirkan.",
                    text.trim()
                ),
            },
            RequestPart::Image {
                inline_data: InlineData {
                    mime_type: mime_type.to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(image),
                },
            },
        ])
    }

    fn request_with_parts(parts: Vec<RequestPart>) -> GenerateRequest {
        GenerateRequest {
            contents: vec![RequestContent { parts }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                top_k: 1,
                top_p: 0.8,
                max_output_tokens: 256,
                response_mime_type: "application/json",
            },
        }
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Classification, ClassifierError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        // Header rather than query string so the key never shows up in error URLs
        let response: GenerateResponse = self
            .client
            .send_json("classifier", |http| {
                http.post(&url)
                    .header("x-goog-api-key", &self.api_key)
                    .json(&request)
            })
            .await
            .map_err(|e| match e {
                ApiError::Decode(reason) => ClassifierError::Malformed(reason),
                other => ClassifierError::Unavailable(other),
            })?;

        let answer: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        parse_model_output(&answer)
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        self.generate(Self::build_request(text)).await
    }

    async fn classify_with_image(
        &self,
        text: &str,
        image: &[u8],
        mime_type: &str,
    ) -> Result<Classification, ClassifierError> {
        self.generate(Self::build_image_request(text, image, mime_type)).await
    }
}

/// Content type for an attachment, judged by its file extension.
pub fn image_mime_type(filename: &str) -> &'static str {
    let extension = filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}

/// Parse the model's text answer. The JSON object may be wrapped in prose or
/// a code fence; the outermost `{...}` is used.
pub fn parse_model_output(answer: &str) -> Result<Classification, ClassifierError> {
    let start = answer.find('{');
    let end = answer.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &answer[s..=e],
        _ => {
            return Err(ClassifierError::Malformed(format!(
                "no JSON object in answer: {:?}",
                answer.chars().take(80).collect::<String>()
            )))
        }
    };

    let parsed: ModelAnswer =
        serde_json::from_str(json).map_err(|e| ClassifierError::Malformed(e.to_string()))?;

    let category = Category::from_str(&parsed.category).map_err(ClassifierError::Malformed)?;

    let signed = match &parsed.amount {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        serde_json::Value::String(s) => parse_signed_token(s),
        _ => None,
    }
    .ok_or_else(|| ClassifierError::Malformed(format!("bad amount: {}", parsed.amount)))?;

    if signed.is_zero() {
        return Err(ClassifierError::Malformed("zero amount".to_string()));
    }
    if signed.abs() > MAX_AMOUNT {
        return Err(ClassifierError::Malformed(format!("amount out of range: {signed}")));
    }

    Ok(Classification::from_signed(category, signed, parsed.note.trim()))
}

fn parse_signed_token(s: &str) -> Option<Decimal> {
    let s = s.trim();
    match s.strip_prefix('-') {
        Some(rest) => parse_amount_token(rest).map(|d| -d),
        None => parse_amount_token(s),
    }
}

// ============================================================================
// NAIVE FALLBACK
// ============================================================================

/// Last numeric token of `text` becomes the amount; category defaults to
/// expense. `None` when the text carries no usable amount.
pub fn fallback_parse(text: &str) -> Option<Classification> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let (index, amount) = tokens
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, token)| parse_amount_token(token).map(|amount| (i, amount)))?;

    let note = tokens
        .iter()
        .enumerate()
        .filter(|(i, token)| *i != index && !token.eq_ignore_ascii_case("rp"))
        .map(|(_, token)| *token)
        .collect::<Vec<_>>()
        .join(" ");

    Some(Classification::from_signed(Category::Expense, amount, note))
}

/// Parse one amount token: `25000`, `25.000`, `25,000`, `Rp5.000`, `50rb`,
/// `50k`, `1,5jt`. Returns `None` for zero, out-of-range or non-amount tokens.
pub fn parse_amount_token(token: &str) -> Option<Decimal> {
    let token = token
        .trim_start_matches('(')
        .trim_end_matches(|c: char| matches!(c, ',' | '.' | '-' | '!' | '?' | ')'))
        .to_lowercase();
    let token = token.strip_prefix("rp").unwrap_or(&token);

    let split = token
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(token.len());
    let (number, suffix) = token.split_at(split);
    if !number.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let multiplier = match suffix {
        "" => 1,
        "k" | "rb" | "ribu" => 1_000,
        "jt" | "juta" => 1_000_000,
        _ => return None,
    };

    let value = if multiplier > 1 {
        // "1,5jt": the separator is a decimal point
        let normalized = number.replace(',', ".");
        if normalized.matches('.').count() > 1 {
            return None;
        }
        Decimal::from_str(&normalized).ok()?
    } else {
        parse_grouped(number)?
    };

    let amount = value.checked_mul(Decimal::from(multiplier))?;
    if amount.is_zero() || amount > MAX_AMOUNT {
        return None;
    }
    Some(amount.normalize())
}

/// `25.000` / `1.000.000` / `25,000` are thousands groups; `12,50` is a
/// decimal fraction.
fn parse_grouped(number: &str) -> Option<Decimal> {
    let parts: Vec<&str> = number.split(['.', ',']).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    match parts.as_slice() {
        [whole] => Decimal::from_str(whole).ok(),
        [first, rest @ ..] if first.len() <= 3 && rest.iter().all(|p| p.len() == 3) => {
            Decimal::from_str(&parts.concat()).ok()
        }
        [whole, fraction] if fraction.len() <= 2 => {
            Decimal::from_str(&format!("{whole}.{fraction}")).ok()
        }
        _ => None,
    }
}
