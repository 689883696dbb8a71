use crate::error::{CaptureError, TargetError};
use crate::locator::ScrollPlan;
use crate::models::{CapturedImage, ImageExtension, PageSnapshot};
use crate::target::{CaptureTarget, InterceptFilter, InterceptedResponse, InterceptionLog};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use headless_chrome::Tab;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const INTERCEPT_HANDLER: &str = "chapter-image-interception";

/// Natural sizes of every image element, keyed by its resolved `src`
const IMAGE_SIZES_SCRIPT: &str = r#"
JSON.stringify(Array.from(document.images)
    .filter(img => img.src && !img.src.startsWith('data:'))
    .map(img => [img.src, img.naturalWidth, img.naturalHeight]))
"#;

/// Result of drawing one image into a canvas in the page
#[derive(Debug, Deserialize)]
struct CopyResult {
    ok: bool,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    tainted: bool,
    #[serde(default)]
    error: Option<String>,
}

fn copy_script(url: &str, mime: &str) -> Result<String, CaptureError> {
    let url_literal =
        serde_json::to_string(url).map_err(|e| CaptureError::Decode(e.to_string()))?;
    Ok(format!(
        r#"
        (() => {{
            const target = {url};
            const img = Array.from(document.images)
                .find(i => i.src === target || i.currentSrc === target);
            if (!img) return JSON.stringify({{ ok: false, error: 'element not found' }});
            if (!img.complete || img.naturalWidth === 0) {{
                return JSON.stringify({{ ok: false, error: 'image not loaded' }});
            }}
            try {{
                const canvas = document.createElement('canvas');
                canvas.width = img.naturalWidth;
                canvas.height = img.naturalHeight;
                canvas.getContext('2d').drawImage(img, 0, 0);
                return JSON.stringify({{ ok: true, data: canvas.toDataURL('{mime}', 0.95) }});
            }} catch (e) {{
                return JSON.stringify({{ ok: false, tainted: e.name === 'SecurityError', error: String(e) }});
            }}
        }})()
        "#,
        url = url_literal,
        mime = mime,
    ))
}

/// Canvas encoders only speak png, jpeg and webp
fn canvas_mime(url: &str) -> &'static str {
    match ImageExtension::from_url(url) {
        Some(ImageExtension::Png) | Some(ImageExtension::Gif) => "image/png",
        Some(ImageExtension::Jpg) | Some(ImageExtension::Jpeg) => "image/jpeg",
        _ => "image/webp",
    }
}

/// Split a `data:image/png;base64,...` URL into bytes and content type
pub(crate) fn decode_data_url(data_url: &str) -> Result<CapturedImage, CaptureError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| CaptureError::Decode("not a data URL".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| CaptureError::Decode("data URL without payload".to_string()))?;
    if !meta.ends_with(";base64") {
        return Err(CaptureError::Decode(format!("unexpected encoding {}", meta)));
    }
    let content_type = meta.trim_end_matches(";base64").to_string();
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| CaptureError::Decode(e.to_string()))?;
    if bytes.is_empty() {
        return Err(CaptureError::Decode("empty canvas".to_string()));
    }
    Ok(CapturedImage::new(bytes, Some(content_type)))
}

/// A Chrome tab driven as a capture target.
///
/// headless_chrome is blocking, so every command runs on the blocking pool
/// under its own timeout.
pub struct BrowserPage {
    tab: Arc<Tab>,
    command_timeout: Duration,
    navigation_timeout: Duration,
}

impl BrowserPage {
    pub fn new(tab: Arc<Tab>, command_timeout: Duration, navigation_timeout: Duration) -> Self {
        Self {
            tab,
            command_timeout,
            navigation_timeout,
        }
    }

    async fn blocking<T, F>(&self, what: &str, limit: Duration, f: F) -> Result<T, TargetError>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T, TargetError> + Send + 'static,
    {
        let tab = self.tab.clone();
        match tokio::time::timeout(limit, tokio::task::spawn_blocking(move || f(tab))).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(TargetError::Browser(join_error.to_string())),
            Err(_) => Err(TargetError::Timeout(format!("{} after {:?}", what, limit))),
        }
    }

    fn evaluate_string(tab: &Tab, script: &str, await_promise: bool) -> Result<String, TargetError> {
        let result = tab
            .evaluate(script, await_promise)
            .map_err(|e| TargetError::Script(e.to_string()))?;
        result
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| TargetError::Script("Script returned no value".to_string()))
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }
}

fn close_tab(tab: &Tab) {
    if let Err(e) = tab.close(true) {
        log::warn!("Failed to close tab {}: {}", tab.get_target_id(), e);
    }
}

/// The browser keeps every tab it created until it is closed
impl Drop for BrowserPage {
    fn drop(&mut self) {
        let tab = self.tab.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || close_tab(&tab));
            }
            Err(_) => close_tab(&tab),
        }
    }
}

#[async_trait]
impl CaptureTarget for BrowserPage {
    async fn load(&self, url: &str) -> Result<(), TargetError> {
        let owned = url.to_string();
        self.blocking("navigation", self.navigation_timeout, move |tab| {
            tab.navigate_to(&owned)
                .and_then(|t| t.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| TargetError::Navigation(format!("Failed to load {}: {}", owned, e)))
        })
        .await
    }

    async fn scroll_through(&self, plan: &ScrollPlan) -> Result<(), TargetError> {
        let script = plan.script();
        // Tall pages take a while at 500px per tick
        let limit = self.navigation_timeout + Duration::from_millis(plan.settle_ms);
        self.blocking("scroll", limit, move |tab| {
            tab.evaluate(&script, true)
                .map(|_| ())
                .map_err(|e| TargetError::Script(format!("Scroll failed: {}", e)))
        })
        .await
    }

    async fn snapshot(&self) -> Result<PageSnapshot, TargetError> {
        self.blocking("snapshot", self.command_timeout, |tab| {
            let html = tab
                .get_content()
                .map_err(|e| TargetError::Script(format!("HTML extraction failed: {}", e)))?;
            let title = tab.get_title().unwrap_or_default();
            let url = tab.get_url();

            let image_sizes = match Self::evaluate_string(&tab, IMAGE_SIZES_SCRIPT, false) {
                Ok(json) => serde_json::from_str::<Vec<(String, u32, u32)>>(&json)
                    .map(|list| {
                        list.into_iter()
                            .map(|(src, w, h)| (src, (w, h)))
                            .collect::<HashMap<_, _>>()
                    })
                    .unwrap_or_default(),
                Err(e) => {
                    log::debug!("Image size lookup failed on {}: {}", url, e);
                    HashMap::new()
                }
            };

            Ok(PageSnapshot {
                url,
                title,
                html,
                image_sizes,
            })
        })
        .await
    }

    fn can_copy_rendered(&self) -> bool {
        true
    }

    async fn copy_rendered(&self, url: &str) -> Result<CapturedImage, CaptureError> {
        let script = copy_script(url, canvas_mime(url))?;
        let raw = self
            .blocking("canvas copy", self.command_timeout, move |tab| {
                Self::evaluate_string(&tab, &script, false)
            })
            .await
            .map_err(|e| match e {
                TargetError::Timeout(_) => {
                    CaptureError::Timeout(self.command_timeout.as_millis() as u64)
                }
                other => CaptureError::Transient(other.to_string()),
            })?;

        let result: CopyResult =
            serde_json::from_str(&raw).map_err(|e| CaptureError::Decode(e.to_string()))?;
        if result.ok {
            let data = result
                .data
                .ok_or_else(|| CaptureError::Decode("canvas returned no data".to_string()))?;
            return decode_data_url(&data);
        }

        let reason = result.error.unwrap_or_else(|| "unknown".to_string());
        if result.tainted {
            Err(CaptureError::Tainted(url.to_string()))
        } else {
            Err(CaptureError::Unsupported(format!("{}: {}", url, reason)))
        }
    }

    fn can_intercept(&self) -> bool {
        true
    }

    async fn start_interception(
        &self,
        filter: &InterceptFilter,
    ) -> Result<Option<InterceptionLog>, TargetError> {
        let log = InterceptionLog::new();
        let sink = log.clone();
        let filter = filter.clone();

        self.blocking("interception setup", self.command_timeout, move |tab| {
            // Registering a handler also enables the Network domain
            tab.register_response_handling(
                INTERCEPT_HANDLER,
                Box::new(move |params, fetch_body| {
                    let url = params.response.url.clone();
                    let mime = params.response.mime_type.clone();
                    if !filter.wants(&url, &mime) {
                        return;
                    }
                    let body = match fetch_body() {
                        Ok(body) => body,
                        Err(e) => {
                            log::debug!("No body for intercepted {}: {}", url, e);
                            return;
                        }
                    };
                    let bytes = if body.base_64_encoded {
                        match BASE64.decode(body.body.as_bytes()) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                log::debug!("Undecodable body for {}: {}", url, e);
                                return;
                            }
                        }
                    } else {
                        body.body.into_bytes()
                    };
                    if filter.accepts(&url, &mime, bytes.len()) {
                        log::debug!("Intercepted {} ({} bytes)", url, bytes.len());
                        sink.push(InterceptedResponse {
                            url,
                            content_type: Some(mime),
                            bytes,
                        });
                    }
                }),
            )
            .map_err(|e| TargetError::Browser(e.to_string()))?;
            Ok(())
        })
        .await?;

        Ok(Some(log))
    }

    async fn stop_interception(&self) {
        let result = self
            .blocking("interception teardown", self.command_timeout, |tab| {
                tab.deregister_response_handling(INTERCEPT_HANDLER)
                    .map(|_| ())
                    .map_err(|e| TargetError::Browser(e.to_string()))
            })
            .await;
        if let Err(e) = result {
            log::warn!("Failed to stop interception: {}", e);
        }
    }

    async fn cookie_header(&self) -> Option<String> {
        let cookies = self
            .blocking("cookies", self.command_timeout, |tab| {
                tab.get_cookies()
                    .map_err(|e| TargetError::Browser(e.to_string()))
            })
            .await
            .ok()?;
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserConfig, BrowserManager};

    #[test]
    fn test_decode_data_url() {
        let encoded = BASE64.encode([0x89u8, b'P', b'N', b'G']);
        let image = decode_data_url(&format!("data:image/png;base64,{}", encoded)).unwrap();
        assert_eq!(image.bytes, vec![0x89, b'P', b'N', b'G']);
        assert_eq!(image.content_type.as_deref(), Some("image/png"));

        assert!(matches!(decode_data_url("https://x/y.png"), Err(CaptureError::Decode(_))));
        assert!(matches!(decode_data_url("data:,"), Err(CaptureError::Decode(_))));
    }

    #[test]
    fn test_canvas_mime_follows_extension() {
        assert_eq!(canvas_mime("https://cdn.example.com/1.jpg"), "image/jpeg");
        assert_eq!(canvas_mime("https://cdn.example.com/1.gif"), "image/png");
        assert_eq!(canvas_mime("https://cdn.example.com/1"), "image/webp");
    }

    #[test]
    fn test_copy_script_escapes_url() {
        let script = copy_script("https://x/a'b\".jpg", "image/jpeg").unwrap();
        assert!(script.contains(r#""https://x/a'b\".jpg""#));
    }

    #[tokio::test]
    #[ignore] // Requires Chrome to be installed
    async fn test_snapshot_real_page() {
        let manager = BrowserManager::new(BrowserConfig::default()).unwrap();
        let page = manager.new_page().unwrap();

        page.load("https://example.com").await.unwrap();
        page.scroll_through(&ScrollPlan::default()).await.unwrap();
        let snapshot = page.snapshot().await.unwrap();

        assert!(snapshot.html.contains("Example"));
        assert!(snapshot.title.contains("Example"));
    }
}
