use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse, Response},
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::BrowserConfig;

/// Value of the `Server` header on every page response
pub const SERVER_ID: &str = concat!("cronwatch/", env!("CARGO_PKG_VERSION"));

/// Extra time the tab stays open after the notification has closed
const WINDOW_GRACE: Duration = Duration::from_secs(3);


/// Content of the notification page.
///
/// Owned by one `BrowserNotifier`; the body is replaced before each send and
/// read by every page request.
#[derive(Debug)]
pub struct PageState {
    title: String,
    body: RwLock<String>,
    window_timeout_ms: Option<u128>,
    notification_timeout_ms: Option<u128>,
}

impl PageState {
    pub fn new(title: impl Into<String>, timeout: Option<Duration>) -> Self {
        let timeout = timeout.filter(|t| !t.is_zero());
        Self {
            title: title.into(),
            body: RwLock::new(String::new()),
            window_timeout_ms: timeout.map(|t| (t + WINDOW_GRACE).as_millis()),
            notification_timeout_ms: timeout.map(|t| t.as_millis()),
        }
    }

    pub fn from_config(config: &BrowserConfig) -> Self {
        Self::new(config.message.clone(), config.timeout)
    }

    pub fn set_body(&self, body: impl Into<String>) {
        *self.body.write() = body.into();
    }

    pub fn body(&self) -> String {
        self.body.read().clone()
    }

    /// Render the full page
    pub fn render(&self) -> String {
        let body = self.body.read();
        notify_html(
            &self.title,
            &body,
            self.window_timeout_ms,
            self.notification_timeout_ms,
        )
    }
}

// ============================================================================
// Notification Page
// ============================================================================

pub async fn notification_page(State(page): State<Arc<PageState>>) -> Response {
    ([(header::SERVER, SERVER_ID)], Html(page.render())).into_response()
}

// ============================================================================
// Rendering helpers
// ============================================================================

fn notify_html(
    title: &str,
    body: &str,
    window_timeout_ms: Option<u128>,
    notification_timeout_ms: Option<u128>,
) -> String {
    format!(
        r##"<!DOCTYPE html>
<html>
	<head>
		<meta charset="utf-8">
		<title>Reminder</title>
	</head>

	<body>
	<script>
var title = {title_js};
var windowTimeout = {window_timeout};
var notificationTimeout = {notification_timeout};

if (windowTimeout) {{
	setTimeout(window.close, windowTimeout);
}}
window.onload = function() {{ notify(title); }};

function show(body) {{
	var n = new Notification('cronwatch notification', {{ body: body }});
	if (notificationTimeout) {{
		setTimeout(function() {{ n.close(); }}, notificationTimeout);
	}}
}}

function notify(body) {{
	if (!("Notification" in window)) {{
		console.log("Notifications not supported on this browser.");
		return;
	}}
	if (Notification.permission === "granted") {{
		show(body);
		return;
	}}
	if (Notification.permission !== "denied") {{
		Notification.requestPermission().then(function (permission) {{
			if (permission === "granted") {{
				show(body);
			}} else {{
				console.log("Notifications are denied.");
			}}
		}});
	}}
}}
	</script>

	<a id="notifyLink" href="#" onclick="notify('notifications are enabled');return false;">Enable notifications?</a>

	<h2>{title}</h2>
	<pre>{body}</pre>
	</body>
</html>
"##,
        title_js = js_string(title),
        window_timeout = js_millis(window_timeout_ms),
        notification_timeout = js_millis(notification_timeout_ms),
        title = escape_html(title),
        body = escape_html(body),
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// A JS string literal that is also safe inside a `<script>` element
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string())
        .to_string()
        .replace("</", "<\\/")
}

fn js_millis(ms: Option<u128>) -> String {
    ms.map(|ms| ms.to_string())
        .unwrap_or_else(|| "null".to_string())
}
