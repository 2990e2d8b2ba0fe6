use std::collections::BTreeMap;
use std::env;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use image::{ImageFormat, Rgb, RgbImage};
use remix_contracts::errors::GenerationError;
use remix_contracts::events::{EventPayload, EventWriter};
use remix_contracts::intake::{data_url_payload, make_data_url};
use remix_contracts::progress::{GenerationUpdate, ProgressSink};
use remix_contracts::session::{
    GallerySelection, GeneratedVariation, Progress, SessionState, SourceImage, VARIATION_COUNT,
};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use uuid::Uuid;

pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

const REQUEST_TIMEOUT_SECONDS: u64 = 90;

/// An image returned by a style client, self-describing via its data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data_url: String,
}

/// The two remote operations the orchestration depends on. Both are
/// all-or-nothing; callers own all sequencing and aggregation.
pub trait StyleClient {
    fn name(&self) -> &str;

    /// Derive exactly `VARIATION_COUNT` style descriptions for the image in
    /// the given document context.
    fn derive_style_descriptions(
        &self,
        image: &SourceImage,
        context: &str,
    ) -> Result<Vec<String>, GenerationError>;

    /// Render one restyled variation of the image for a single description.
    fn render_variation(
        &self,
        image: &SourceImage,
        description: &str,
    ) -> Result<EncodedImage, GenerationError>;
}

#[derive(Default)]
pub struct StyleClientRegistry {
    clients: BTreeMap<String, Box<dyn StyleClient>>,
}

impl StyleClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: StyleClient + 'static>(&mut self, client: C) {
        self.clients
            .insert(client.name().to_string(), Box::new(client));
    }

    pub fn get(&self, name: &str) -> Option<&dyn StyleClient> {
        self.clients.get(name).map(|client| client.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }
}

pub fn default_client_registry() -> StyleClientRegistry {
    let mut clients = StyleClientRegistry::new();
    clients.register(DryrunStyleClient);
    clients.register(GeminiStyleClient::new());
    clients
}

/// Offline client: deterministic style listings and locally rendered
/// placeholder images, so the pipeline runs without a credential.
pub struct DryrunStyleClient;

impl StyleClient for DryrunStyleClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn derive_style_descriptions(
        &self,
        _image: &SourceImage,
        context: &str,
    ) -> Result<Vec<String>, GenerationError> {
        Ok(dryrun_style_descriptions(context))
    }

    fn render_variation(
        &self,
        _image: &SourceImage,
        description: &str,
    ) -> Result<EncodedImage, GenerationError> {
        render_placeholder(description)
    }
}

fn dryrun_style_descriptions(context: &str) -> Vec<String> {
    vec![
        format!("A minimalist duotone vector illustration suited to {context}"),
        format!("A cinematic corporate photograph with dramatic lighting for {context}"),
        format!("An abstract watercolor wash evoking {context}"),
        format!("A retro-futuristic rendition with neon accents for {context}"),
        format!("A flat infographic treatment aligned with {context}"),
        format!("A fine-line engraving reinterpretation of {context}"),
        format!("A paper-collage composition themed around {context}"),
        format!("A soft-gradient glass-effect restyle for {context}"),
    ]
}

fn dryrun_seed(description: &str) -> u32 {
    description
        .bytes()
        .fold(0u32, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as u32))
}

fn render_placeholder(description: &str) -> Result<EncodedImage, GenerationError> {
    let seed = dryrun_seed(description);
    let mut canvas = RgbImage::new(64, 64);
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let r = ((seed >> 16) as u8).wrapping_add((x * 3) as u8);
        let g = ((seed >> 8) as u8).wrapping_add((y * 3) as u8);
        let b = (seed as u8).wrapping_add((x + y) as u8);
        *pixel = Rgb([r, g, b]);
    }

    let mut buffer = Cursor::new(Vec::new());
    canvas
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|err| GenerationError::Unknown(format!("placeholder encode failed: {err}")))?;
    Ok(EncodedImage {
        mime_type: "image/png".to_string(),
        data_url: make_data_url("image/png", buffer.get_ref()),
    })
}

/// Remote client for the Gemini generateContent API: one text-model call for
/// the style listing, one image-model call per variation.
pub struct GeminiStyleClient {
    api_base: String,
    text_model: String,
    image_model: String,
    http: HttpClient,
}

impl GeminiStyleClient {
    pub fn new() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            http: HttpClient::new(),
        }
    }

    pub fn with_models(mut self, text_model: Option<String>, image_model: Option<String>) -> Self {
        if let Some(model) = text_model {
            self.text_model = model;
        }
        if let Some(model) = image_model {
            self.image_model = model;
        }
        self
    }

    fn api_key() -> Result<String, GenerationError> {
        non_empty_env("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .ok_or_else(|| {
                GenerationError::RemoteFailure(
                    "GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string(),
                )
            })
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn image_part(image: &SourceImage) -> Result<Value, GenerationError> {
        let data = data_url_payload(&image.data_url).ok_or_else(|| {
            GenerationError::Unknown(format!(
                "source image '{}' has a malformed data URL",
                image.file_name
            ))
        })?;
        Ok(json!({
            "inlineData": {
                "mimeType": image.mime_type,
                "data": data,
            }
        }))
    }

    fn post_generate(
        &self,
        model: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<Value, GenerationError> {
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .json(payload)
            .send()
            .map_err(|err| {
                GenerationError::RemoteFailure(format!("request to {model} failed: {err}"))
            })?;

        let status = response.status();
        let body = response.text().map_err(|err| {
            GenerationError::RemoteFailure(format!("{model} response unreadable: {err}"))
        })?;
        if !status.is_success() {
            return Err(GenerationError::RemoteFailure(format!(
                "{model} returned HTTP {}: {}",
                status.as_u16(),
                truncate_text(&body, 512)
            )));
        }
        serde_json::from_str(&body).map_err(|err| {
            GenerationError::RemoteFailure(format!("{model} returned unparseable JSON: {err}"))
        })
    }
}

impl StyleClient for GeminiStyleClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn derive_style_descriptions(
        &self,
        image: &SourceImage,
        context: &str,
    ) -> Result<Vec<String>, GenerationError> {
        let api_key = Self::api_key()?;
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    Self::image_part(image)?,
                    { "text": style_listing_prompt(context) },
                ],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                },
            },
        });

        let response = self.post_generate(&self.text_model, &api_key, &payload)?;
        parse_style_listing(&response)
    }

    fn render_variation(
        &self,
        image: &SourceImage,
        description: &str,
    ) -> Result<EncodedImage, GenerationError> {
        let api_key = Self::api_key()?;
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    Self::image_part(image)?,
                    { "text": restyle_prompt(description) },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"],
            },
        });

        let response = self.post_generate(&self.image_model, &api_key, &payload)?;
        extract_inline_image(&response).ok_or_else(|| {
            GenerationError::NoImageReturned(format!(
                "no image in response for style \"{}\"",
                truncate_text(description, 120)
            ))
        })
    }
}

fn style_listing_prompt(context: &str) -> String {
    format!(
        "You are a creative director specialising in modern document design. \
         Based on the attached image and the document context of \"{context}\", \
         produce exactly {VARIATION_COUNT} distinct, concise, practical style \
         suggestions. The suggestions will be used to restyle the image, so keep \
         them varied and professional (for example 'A minimalist vector \
         illustration with a duotone palette', 'A cinematic photograph with \
         dramatic lighting and a corporate feel', 'An abstract watercolor \
         effect', 'A retro-futuristic design with neon details'). Each \
         suggestion must be one short descriptive sentence. Return the result \
         as a JSON array of {VARIATION_COUNT} strings."
    )
}

fn restyle_prompt(description: &str) -> String {
    format!(
        "Restyle the supplied image to match the following style: \
         \"{description}\". It is essential to keep the original aspect ratio \
         and main subject, and to preserve any text inside the image unchanged."
    )
}

fn first_candidate_text(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let mut text = String::new();
    for part in parts {
        if let Some(chunk) = part.get("text").and_then(Value::as_str) {
            text.push_str(chunk);
        }
    }
    if text.trim().is_empty() {
        return None;
    }
    Some(text)
}

fn parse_style_listing(response: &Value) -> Result<Vec<String>, GenerationError> {
    let text = first_candidate_text(response).ok_or_else(|| {
        GenerationError::InvalidResponse("response contained no style text".to_string())
    })?;
    let parsed: Value = serde_json::from_str(text.trim()).map_err(|err| {
        GenerationError::InvalidResponse(format!("style listing is not valid JSON: {err}"))
    })?;
    let Some(rows) = parsed.as_array() else {
        return Err(GenerationError::InvalidResponse(
            "style listing is not an array".to_string(),
        ));
    };

    let mut styles: Vec<String> = rows
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect();
    if styles.len() < VARIATION_COUNT {
        return Err(GenerationError::InvalidResponse(format!(
            "expected {VARIATION_COUNT} style descriptions, got {}",
            styles.len()
        )));
    }
    styles.truncate(VARIATION_COUNT);
    Ok(styles)
}

fn extract_inline_image(response: &Value) -> Option<EncodedImage> {
    let candidates = response.get("candidates").and_then(Value::as_array)?;
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array);
        let Some(parts) = parts else {
            continue;
        };
        for part in parts {
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object);
            let Some(inline) = inline else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png")
                .to_string();
            return Some(EncodedImage {
                data_url: format!("data:{mime_type};base64,{data}"),
                mime_type,
            });
        }
    }
    None
}

/// Outcome of applying a remote result against the session's current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Stale,
}

/// Captures the run a generation attempt belongs to, plus the inputs the
/// client needs. Results are only applied while the counter still matches.
#[derive(Debug, Clone)]
pub struct RunTicket {
    run: u64,
    image: SourceImage,
    context: String,
}

impl RunTicket {
    pub fn run(&self) -> u64 {
        self.run
    }

    pub fn image(&self) -> &SourceImage {
        &self.image
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

/// Owns the session lifecycle. All `SessionState` mutation goes through the
/// transition methods below; remote results are applied through run-counter
/// checked tickets so abandoned runs cannot touch newer state.
pub struct RemixSession {
    session_id: String,
    events: EventWriter,
    state: SessionState,
    run: u64,
}

impl RemixSession {
    pub fn new(events_path: impl Into<PathBuf>) -> Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        let events = EventWriter::new(events_path.into(), session_id.clone());
        events.emit("session_started", 0, EventPayload::new())?;
        Ok(Self {
            session_id,
            events,
            state: SessionState::NoImage,
            run: 0,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn run(&self) -> u64 {
        self.run
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    pub fn upload(&mut self, image: SourceImage) -> Result<()> {
        if !matches!(self.state, SessionState::NoImage) {
            bail!(
                "an image is already loaded (state: {}); reset the session first",
                self.state.phase_name()
            );
        }
        self.events.emit(
            "image_uploaded",
            self.run,
            map_object(json!({
                "file_name": image.file_name,
                "mime_type": image.mime_type,
            })),
        )?;
        self.state = SessionState::ImageReady { image };
        Ok(())
    }

    /// Start a generation run. Valid from `ImageReady` (first run) and from
    /// `Complete` (generate again); prior variations are cleared.
    pub fn begin_generation(&mut self, context: &str) -> Result<RunTicket> {
        let context = context.trim();
        if context.is_empty() {
            bail!("context text must not be empty");
        }
        let image = match &self.state {
            SessionState::ImageReady { image } => image.clone(),
            SessionState::Complete { image, .. } => image.clone(),
            other => bail!("cannot start generation from the {} state", other.phase_name()),
        };

        self.run += 1;
        self.events.emit(
            "generation_started",
            self.run,
            map_object(json!({ "context": context })),
        )?;
        self.state = SessionState::GeneratingDescriptions {
            image: image.clone(),
            context: context.to_string(),
        };
        Ok(RunTicket {
            run: self.run,
            image,
            context: context.to_string(),
        })
    }

    pub fn apply_descriptions(
        &mut self,
        ticket: &RunTicket,
        result: Result<Vec<String>, GenerationError>,
    ) -> Result<ApplyOutcome> {
        if self.discard_if_stale(ticket, "styles_derived")? {
            return Ok(ApplyOutcome::Stale);
        }
        let SessionState::GeneratingDescriptions { image, context } = &self.state else {
            bail!(
                "no style derivation in flight (state: {})",
                self.state.phase_name()
            );
        };
        let (image, context) = (image.clone(), context.clone());

        match result {
            Ok(styles) => {
                if styles.len() != VARIATION_COUNT {
                    let error = GenerationError::InvalidResponse(format!(
                        "expected {VARIATION_COUNT} style descriptions, got {}",
                        styles.len()
                    ));
                    self.fail(error.to_string(), &error)?;
                    return Ok(ApplyOutcome::Applied);
                }
                self.events.emit(
                    "styles_derived",
                    self.run,
                    map_object(json!({
                        "count": styles.len(),
                        "styles": styles,
                    })),
                )?;
                self.state = SessionState::GeneratingVariations {
                    image,
                    context,
                    styles,
                    variations: Vec::new(),
                    progress: Progress::start(),
                };
            }
            Err(error) => {
                self.fail(error.to_string(), &error)?;
            }
        }
        Ok(ApplyOutcome::Applied)
    }

    pub fn apply_variation(
        &mut self,
        ticket: &RunTicket,
        index: usize,
        result: Result<EncodedImage, GenerationError>,
    ) -> Result<ApplyOutcome> {
        if self.discard_if_stale(ticket, "variation_rendered")? {
            return Ok(ApplyOutcome::Stale);
        }

        match result {
            Ok(rendered) => {
                let SessionState::GeneratingVariations {
                    styles,
                    variations,
                    progress,
                    ..
                } = &mut self.state
                else {
                    bail!(
                        "no variation run in flight (state: {})",
                        self.state.phase_name()
                    );
                };
                if index != variations.len() {
                    bail!(
                        "variation {index} applied out of order (expected {})",
                        variations.len()
                    );
                }
                let Some(description) = styles.get(index).cloned() else {
                    bail!("variation {index} has no matching style description");
                };

                variations.push(GeneratedVariation {
                    index,
                    description: description.clone(),
                    mime_type: rendered.mime_type,
                    data_url: rendered.data_url,
                });
                progress.current += 1;
                let (current, total) = (progress.current, progress.total);
                let done = variations.len() == VARIATION_COUNT;

                self.events.emit(
                    "variation_rendered",
                    self.run,
                    map_object(json!({
                        "index": index,
                        "description": description,
                        "current": current,
                        "total": total,
                    })),
                )?;

                if done {
                    self.complete()?;
                }
            }
            Err(error) => {
                let style = match &self.state {
                    SessionState::GeneratingVariations { styles, .. } => {
                        styles.get(index).cloned().unwrap_or_default()
                    }
                    other => bail!(
                        "no variation run in flight (state: {})",
                        other.phase_name()
                    ),
                };
                let message = format!("could not render the style \"{style}\": {error}");
                self.fail(message, &error)?;
            }
        }
        Ok(ApplyOutcome::Applied)
    }

    /// Record the gallery preview selection; only meaningful once complete.
    pub fn select(&mut self, selection: GallerySelection) -> Result<()> {
        let SessionState::Complete {
            variations,
            selected,
            ..
        } = &mut self.state
        else {
            bail!(
                "nothing to select yet (state: {})",
                self.state.phase_name()
            );
        };
        if let GallerySelection::Variation(index) = selection {
            if index >= variations.len() {
                bail!(
                    "variation {index} does not exist ({} available)",
                    variations.len()
                );
            }
        }
        *selected = selection;
        self.events.emit(
            "selection_changed",
            self.run,
            map_object(json!({
                "selected": serde_json::to_value(selection).unwrap_or(Value::Null),
            })),
        )?;
        Ok(())
    }

    /// Return to `NoImage` from any state, dropping all session data. The run
    /// counter is bumped so results of an abandoned run are discarded.
    pub fn reset(&mut self) -> Result<()> {
        self.run += 1;
        self.events.emit(
            "session_reset",
            self.run,
            map_object(json!({ "from": self.state.phase_name() })),
        )?;
        self.state = SessionState::NoImage;
        Ok(())
    }

    fn complete(&mut self) -> Result<()> {
        let previous = std::mem::replace(&mut self.state, SessionState::NoImage);
        let SessionState::GeneratingVariations {
            image,
            context,
            variations,
            ..
        } = previous
        else {
            bail!("completed without a variation run in flight");
        };
        self.events.emit(
            "generation_complete",
            self.run,
            map_object(json!({ "total": variations.len() })),
        )?;
        self.state = SessionState::Complete {
            image,
            context,
            variations,
            selected: GallerySelection::Original,
        };
        Ok(())
    }

    fn fail(&mut self, message: String, error: &GenerationError) -> Result<()> {
        self.events.emit(
            "generation_failed",
            self.run,
            map_object(json!({
                "error": message,
                "kind": error.kind(),
            })),
        )?;
        self.state = SessionState::Failed { message };
        Ok(())
    }

    fn discard_if_stale(&self, ticket: &RunTicket, stage: &str) -> Result<bool> {
        if ticket.run == self.run {
            return Ok(false);
        }
        self.events.emit(
            "stale_result_discarded",
            self.run,
            map_object(json!({
                "stage": stage,
                "ticket_run": ticket.run,
            })),
        )?;
        Ok(true)
    }
}

/// Drive one full generation run sequentially: derive the style listing,
/// then render variations one at a time with fail-fast abort. Client errors
/// never escape; they land in the `Failed` state and the sink.
pub fn run_generation(
    session: &mut RemixSession,
    client: &dyn StyleClient,
    context: &str,
    sink: &mut dyn ProgressSink,
) -> Result<()> {
    let ticket = session.begin_generation(context)?;

    sink.on_update(GenerationUpdate::DescriptionsRequested);
    let derived = client.derive_style_descriptions(ticket.image(), ticket.context());
    if session.apply_descriptions(&ticket, derived)? == ApplyOutcome::Stale {
        return Ok(());
    }

    let styles = match session.state() {
        SessionState::GeneratingVariations { styles, .. } => styles.clone(),
        SessionState::Failed { message } => {
            sink.on_update(GenerationUpdate::Failed { message });
            return Ok(());
        }
        other => bail!("unexpected state after style derivation: {}", other.phase_name()),
    };
    sink.on_update(GenerationUpdate::DescriptionsReady { styles: &styles });

    for (index, style) in styles.iter().enumerate() {
        let rendered = client.render_variation(ticket.image(), style);
        if session.apply_variation(&ticket, index, rendered)? == ApplyOutcome::Stale {
            return Ok(());
        }
        match session.state() {
            SessionState::GeneratingVariations {
                variations,
                progress,
                ..
            } => {
                if let Some(variation) = variations.last() {
                    sink.on_update(GenerationUpdate::VariationRendered {
                        variation,
                        progress: *progress,
                    });
                }
            }
            SessionState::Complete { variations, .. } => {
                if let Some(variation) = variations.last() {
                    sink.on_update(GenerationUpdate::VariationRendered {
                        variation,
                        progress: Progress {
                            current: variations.len() as u64,
                            total: VARIATION_COUNT as u64,
                        },
                    });
                }
                sink.on_update(GenerationUpdate::Completed {
                    total: variations.len(),
                });
            }
            SessionState::Failed { message } => {
                sink.on_update(GenerationUpdate::Failed { message });
                return Ok(());
            }
            other => bail!(
                "unexpected state while rendering variations: {}",
                other.phase_name()
            ),
        }
    }

    Ok(())
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs;
    use std::path::Path;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use remix_contracts::intake::{data_url_payload, source_image_from_bytes};
    use remix_contracts::naming::variation_download_name;
    use remix_contracts::progress::NullProgress;
    use serde_json::json;

    use super::*;

    struct ScriptedClient {
        styles: Result<Vec<String>, GenerationError>,
        renders: RefCell<VecDeque<Result<EncodedImage, GenerationError>>>,
    }

    impl ScriptedClient {
        fn new(
            styles: Result<Vec<String>, GenerationError>,
            renders: Vec<Result<EncodedImage, GenerationError>>,
        ) -> Self {
            Self {
                styles,
                renders: RefCell::new(renders.into()),
            }
        }

        fn pending_renders(&self) -> usize {
            self.renders.borrow().len()
        }
    }

    impl StyleClient for ScriptedClient {
        fn name(&self) -> &str {
            "scripted"
        }

        fn derive_style_descriptions(
            &self,
            _image: &SourceImage,
            _context: &str,
        ) -> Result<Vec<String>, GenerationError> {
            self.styles.clone()
        }

        fn render_variation(
            &self,
            _image: &SourceImage,
            description: &str,
        ) -> Result<EncodedImage, GenerationError> {
            self.renders.borrow_mut().pop_front().unwrap_or_else(|| {
                Err(GenerationError::Unknown(format!(
                    "no scripted render for \"{description}\""
                )))
            })
        }
    }

    fn png_bytes() -> anyhow::Result<Vec<u8>> {
        let canvas = RgbImage::new(10, 10);
        let mut buffer = Cursor::new(Vec::new());
        canvas.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }

    fn sample_image() -> anyhow::Result<SourceImage> {
        source_image_from_bytes("logo.png", "image/png", &png_bytes()?)
            .map_err(anyhow::Error::new)
    }

    fn styles8() -> Vec<String> {
        (1..=8).map(|index| format!("Style {index}")).collect()
    }

    fn ok_render(tag: u32) -> Result<EncodedImage, GenerationError> {
        Ok(EncodedImage {
            mime_type: "image/png".to_string(),
            data_url: make_data_url("image/png", format!("pixels-{tag}").as_bytes()),
        })
    }

    fn ok_renders(count: usize) -> Vec<Result<EncodedImage, GenerationError>> {
        (0..count).map(|index| ok_render(index as u32)).collect()
    }

    fn new_session(dir: &Path) -> anyhow::Result<RemixSession> {
        RemixSession::new(dir.join("events.jsonl"))
    }

    fn event_types(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    #[test]
    fn session_events_carry_the_session_id() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let session = RemixSession::new(&events_path)?;
        assert!(!session.session_id().is_empty());
        assert_eq!(session.event_writer().session_id(), session.session_id());

        let raw = fs::read_to_string(&events_path)?;
        let first: Value = serde_json::from_str(raw.lines().next().unwrap_or_default())?;
        assert_eq!(first["type"], json!("session_started"));
        assert_eq!(first["session_id"], json!(session.session_id()));
        Ok(())
    }

    #[test]
    fn upload_enters_image_ready_with_well_formed_data_url() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = new_session(temp.path())?;
        session.upload(sample_image()?)?;

        let SessionState::ImageReady { image } = session.state() else {
            panic!("expected image_ready, got {}", session.state().phase_name());
        };
        assert!(image.data_url.starts_with("data:image/png;base64,"));
        let payload = data_url_payload(&image.data_url).unwrap_or_default();
        assert!(!BASE64.decode(payload)?.is_empty());
        Ok(())
    }

    #[test]
    fn upload_requires_a_fresh_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = new_session(temp.path())?;
        session.upload(sample_image()?)?;
        assert!(session.upload(sample_image()?).is_err());

        session.reset()?;
        session.upload(sample_image()?)?;
        Ok(())
    }

    #[test]
    fn full_run_completes_with_eight_ordered_variations() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = new_session(temp.path())?;
        session.upload(sample_image()?)?;

        let client = ScriptedClient::new(Ok(styles8()), ok_renders(8));
        run_generation(&mut session, &client, "relatório anual", &mut NullProgress)?;

        let SessionState::Complete {
            context,
            variations,
            selected,
            ..
        } = session.state()
        else {
            panic!("expected complete, got {}", session.state().phase_name());
        };
        assert_eq!(context, "relatório anual");
        assert_eq!(variations.len(), 8);
        assert_eq!(*selected, GallerySelection::Original);
        for (position, variation) in variations.iter().enumerate() {
            assert_eq!(variation.index, position);
            assert_eq!(variation.description, format!("Style {}", position + 1));
        }
        assert_eq!(
            variation_download_name(context, variations[0].index, &variations[0].mime_type),
            "remix-relatório_anual-1.png"
        );
        assert_eq!(
            variation_download_name(context, variations[7].index, &variations[7].mime_type),
            "remix-relatório_anual-8.png"
        );
        Ok(())
    }

    #[test]
    fn generation_event_order_contract() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut session = RemixSession::new(&events_path)?;
        session.upload(sample_image()?)?;

        let client = ScriptedClient::new(Ok(styles8()), ok_renders(8));
        run_generation(&mut session, &client, "annual report", &mut NullProgress)?;

        let types = event_types(&events_path);
        let started_idx = types
            .iter()
            .position(|value| value == "generation_started")
            .expect("missing generation_started");
        let derived_idx = types
            .iter()
            .position(|value| value == "styles_derived")
            .expect("missing styles_derived");
        let first_render_idx = types
            .iter()
            .position(|value| value == "variation_rendered")
            .expect("missing variation_rendered");
        let complete_idx = types
            .iter()
            .position(|value| value == "generation_complete")
            .expect("missing generation_complete");

        assert!(started_idx < derived_idx);
        assert!(derived_idx < first_render_idx);
        assert!(first_render_idx < complete_idx);
        assert_eq!(
            types.iter().filter(|value| *value == "variation_rendered").count(),
            8
        );
        Ok(())
    }

    #[test]
    fn style_listing_failure_reaches_failed_with_distinct_message() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = new_session(temp.path())?;
        session.upload(sample_image()?)?;

        let error = GenerationError::RemoteFailure("model unavailable".to_string());
        let client = ScriptedClient::new(Err(error.clone()), Vec::new());
        run_generation(&mut session, &client, "annual report", &mut NullProgress)?;

        let SessionState::Failed { message } = session.state() else {
            panic!("expected failed, got {}", session.state().phase_name());
        };
        assert_eq!(message, &error.to_string());
        assert!(!message.contains("could not render"));
        assert!(session.state().variations().is_empty());
        Ok(())
    }

    #[test]
    fn third_render_failure_aborts_and_names_the_style() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut session = RemixSession::new(&events_path)?;
        session.upload(sample_image()?)?;

        let renders = vec![
            ok_render(0),
            ok_render(1),
            Err(GenerationError::NoImageReturned(
                "empty candidate".to_string(),
            )),
            ok_render(3),
        ];
        let client = ScriptedClient::new(Ok(styles8()), renders);
        run_generation(&mut session, &client, "annual report", &mut NullProgress)?;

        let SessionState::Failed { message } = session.state() else {
            panic!("expected failed, got {}", session.state().phase_name());
        };
        assert!(message.contains("could not render"));
        assert!(message.contains("Style 3"));

        // fail-fast: the queued fourth render was never requested
        assert_eq!(client.pending_renders(), 1);

        let types = event_types(&events_path);
        assert_eq!(
            types.iter().filter(|value| *value == "variation_rendered").count(),
            2
        );
        assert!(!types.contains(&"generation_complete".to_string()));
        Ok(())
    }

    #[test]
    fn short_style_listing_is_rejected_by_the_machine() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = new_session(temp.path())?;
        session.upload(sample_image()?)?;

        let five = (1..=5).map(|index| format!("Style {index}")).collect();
        let client = ScriptedClient::new(Ok(five), Vec::new());
        run_generation(&mut session, &client, "annual report", &mut NullProgress)?;

        let SessionState::Failed { message } = session.state() else {
            panic!("expected failed, got {}", session.state().phase_name());
        };
        assert!(message.contains("got 5"));
        Ok(())
    }

    #[test]
    fn reset_discards_stale_in_flight_results() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut session = RemixSession::new(&events_path)?;
        session.upload(sample_image()?)?;

        let ticket = session.begin_generation("annual report")?;
        assert_eq!(
            session.apply_descriptions(&ticket, Ok(styles8()))?,
            ApplyOutcome::Applied
        );
        session.apply_variation(&ticket, 0, ok_render(0))?;
        session.apply_variation(&ticket, 1, ok_render(1))?;

        session.reset()?;
        assert_eq!(session.state(), &SessionState::NoImage);
        assert!(ticket.run() < session.run());

        // the in-flight render resolves after the user walked away
        assert_eq!(
            session.apply_variation(&ticket, 2, ok_render(2))?,
            ApplyOutcome::Stale
        );
        assert_eq!(session.state(), &SessionState::NoImage);
        assert!(event_types(&events_path).contains(&"stale_result_discarded".to_string()));
        Ok(())
    }

    #[test]
    fn reset_is_idempotent_from_every_state() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = new_session(temp.path())?;

        session.reset()?;
        assert_eq!(session.state(), &SessionState::NoImage);

        session.upload(sample_image()?)?;
        session.reset()?;
        assert_eq!(session.state(), &SessionState::NoImage);
        assert_eq!(session.state().context(), None);

        session.upload(sample_image()?)?;
        let client = ScriptedClient::new(Ok(styles8()), ok_renders(8));
        run_generation(&mut session, &client, "annual report", &mut NullProgress)?;
        let run_before = session.run();
        session.reset()?;
        assert_eq!(session.state(), &SessionState::NoImage);
        assert!(session.state().variations().is_empty());
        assert_eq!(session.run(), run_before + 1);

        session.reset()?;
        assert_eq!(session.state(), &SessionState::NoImage);
        Ok(())
    }

    #[test]
    fn generate_again_replaces_the_prior_variations() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = new_session(temp.path())?;
        session.upload(sample_image()?)?;

        let first = ScriptedClient::new(Ok(styles8()), ok_renders(8));
        run_generation(&mut session, &first, "annual report", &mut NullProgress)?;
        let first_urls: Vec<String> = session
            .state()
            .variations()
            .iter()
            .map(|variation| variation.data_url.clone())
            .collect();
        let first_run = session.run();

        let fresh: Vec<String> = (1..=8).map(|index| format!("Fresh style {index}")).collect();
        let again = ScriptedClient::new(
            Ok(fresh),
            (100..108).map(ok_render).collect(),
        );
        run_generation(&mut session, &again, "annual report", &mut NullProgress)?;

        let SessionState::Complete { variations, .. } = session.state() else {
            panic!("expected complete, got {}", session.state().phase_name());
        };
        assert_eq!(variations.len(), 8);
        assert_eq!(session.run(), first_run + 1);
        for variation in variations {
            assert!(!first_urls.contains(&variation.data_url));
            assert!(variation.description.starts_with("Fresh style"));
        }
        Ok(())
    }

    #[test]
    fn selection_is_validated_against_the_gallery() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = new_session(temp.path())?;
        session.upload(sample_image()?)?;
        assert!(session.select(GallerySelection::Original).is_err());

        let client = ScriptedClient::new(Ok(styles8()), ok_renders(8));
        run_generation(&mut session, &client, "annual report", &mut NullProgress)?;

        session.select(GallerySelection::Variation(7))?;
        let SessionState::Complete { selected, .. } = session.state() else {
            panic!("expected complete");
        };
        assert_eq!(*selected, GallerySelection::Variation(7));
        assert!(session.select(GallerySelection::Variation(8)).is_err());
        session.select(GallerySelection::Original)?;
        Ok(())
    }

    #[test]
    fn generation_requires_an_image_and_a_context() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = new_session(temp.path())?;
        assert!(session.begin_generation("annual report").is_err());

        session.upload(sample_image()?)?;
        assert!(session.begin_generation("   ").is_err());
        assert!(session.begin_generation("annual report").is_ok());
        Ok(())
    }

    #[test]
    fn style_listing_parses_truncates_and_rejects() {
        let wrapped = |text: &str| {
            json!({
                "candidates": [{
                    "content": { "parts": [{ "text": text }] }
                }]
            })
        };

        let ten: Vec<String> = (1..=10).map(|index| format!("Style {index}")).collect();
        let styles = parse_style_listing(&wrapped(&json!(ten).to_string()))
            .expect("ten entries should truncate");
        assert_eq!(styles.len(), 8);
        assert_eq!(styles[7], "Style 8");

        let three = json!(["a", "b", "c"]).to_string();
        let short = parse_style_listing(&wrapped(&three)).expect_err("short listing");
        assert_eq!(short.kind(), "invalid-response");

        let empty = parse_style_listing(&wrapped("[]")).expect_err("empty listing");
        assert_eq!(empty.kind(), "invalid-response");

        let not_array = parse_style_listing(&wrapped("{\"styles\": []}"))
            .expect_err("non-array listing");
        assert_eq!(not_array.kind(), "invalid-response");

        let no_text = parse_style_listing(&json!({ "candidates": [] }))
            .expect_err("no candidates");
        assert_eq!(no_text.kind(), "invalid-response");
    }

    #[test]
    fn inline_image_extraction_handles_both_casings() {
        let camel = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "sure!" },
                        { "inlineData": { "mimeType": "image/webp", "data": "QUJD" } },
                    ]
                }
            }]
        });
        let extracted = extract_inline_image(&camel).expect("camelCase inline data");
        assert_eq!(extracted.mime_type, "image/webp");
        assert_eq!(extracted.data_url, "data:image/webp;base64,QUJD");

        let snake = json!({
            "candidates": [{
                "content": {
                    "parts": [{ "inline_data": { "mime_type": "image/png", "data": "QUJD" } }]
                }
            }]
        });
        assert!(extract_inline_image(&snake).is_some());

        let text_only = json!({
            "candidates": [{ "content": { "parts": [{ "text": "no image here" }] } }]
        });
        assert!(extract_inline_image(&text_only).is_none());
    }

    #[test]
    fn dryrun_client_is_deterministic_and_decodable() -> anyhow::Result<()> {
        let client = DryrunStyleClient;
        let image = sample_image()?;

        let first = client.derive_style_descriptions(&image, "annual report")?;
        let second = client.derive_style_descriptions(&image, "annual report")?;
        assert_eq!(first.len(), VARIATION_COUNT);
        assert_eq!(first, second);
        assert!(first[0].contains("annual report"));

        let rendered = client.render_variation(&image, &first[0])?;
        assert_eq!(rendered.mime_type, "image/png");
        let payload = data_url_payload(&rendered.data_url).unwrap_or_default();
        let decoded = image::load_from_memory(&BASE64.decode(payload)?)?;
        assert_eq!(decoded.width(), 64);

        let again = client.render_variation(&image, &first[0])?;
        assert_eq!(rendered, again);
        let other = client.render_variation(&image, &first[1])?;
        assert_ne!(rendered, other);
        Ok(())
    }

    #[test]
    fn default_registry_lists_both_clients() {
        let registry = default_client_registry();
        assert_eq!(registry.names(), vec!["dryrun".to_string(), "gemini".to_string()]);
        assert!(registry.get("dryrun").is_some());
        assert!(registry.get("gemini").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn gemini_endpoint_handles_model_prefixes() {
        let client = GeminiStyleClient::new();
        assert!(client
            .endpoint_for_model("gemini-2.5-flash")
            .ends_with("/models/gemini-2.5-flash:generateContent"));
        assert!(client
            .endpoint_for_model("models/gemini-2.5-flash")
            .ends_with("/models/gemini-2.5-flash:generateContent"));
    }
}
