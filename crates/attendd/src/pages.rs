use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::store::{Page, PresenceRecord};

/// Timestamp format used on the dashboard and in JSON replies.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Escape text for inclusion in HTML body or attribute context.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn coordinate(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.5}"))
}

fn flash(message: Option<&str>, class: &str) -> String {
    match message {
        Some(m) => format!(r#"<p class="flash {class}">{}</p>"#, escape_html(m)),
        None => String::new(),
    }
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title} · Attend</title>
<style>
  * {{ margin: 0; padding: 0; box-sizing: border-box; }}
  body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
         color: #e0e0e0; background: #0d1117; line-height: 1.6; }}
  .container {{ max-width: 800px; margin: 0 auto; padding: 2rem 1rem; }}
  h1 {{ font-size: 1.8rem; margin-bottom: 1rem; color: #f0f0f0; }}
  h2 {{ font-size: 1.2rem; margin: 2rem 0 0.75rem; color: #c0c0c0; }}
  label {{ display: block; margin: 0.75rem 0 0.25rem; color: #a0a0a0; }}
  input {{ width: 100%; padding: 0.5rem; background: #161b22; color: #e0e0e0;
          border: 1px solid #30363d; border-radius: 4px; }}
  button {{ margin-top: 1rem; padding: 0.5rem 1.25rem; background: #238636; color: #fff;
           border: none; border-radius: 4px; cursor: pointer; }}
  table {{ width: 100%; border-collapse: collapse; margin-bottom: 1rem; }}
  th, td {{ padding: 0.5rem 0.75rem; text-align: left; border-bottom: 1px solid #21262d; }}
  th {{ color: #8b949e; font-weight: 600; font-size: 0.85em; text-transform: uppercase; }}
  a {{ color: #58a6ff; text-decoration: none; }}
  .flash {{ padding: 0.5rem 0.75rem; border-radius: 4px; margin-bottom: 1rem; }}
  .error {{ background: #3d1214; color: #ff7b72; }}
  .info {{ background: #0f2d1a; color: #7ee787; }}
  .preview {{ width: 100%; max-width: 640px; border: 1px solid #30363d; border-radius: 8px; }}
  nav {{ display: flex; justify-content: space-between; margin-bottom: 1.5rem; }}
</style>
</head>
<body>
<div class="container">
{body}
</div>
</body>
</html>"#,
        title = escape_html(title),
    )
}

pub fn login_page(error: Option<&str>, notice: Option<&str>) -> String {
    let body = format!(
        r#"<h1>Log in</h1>
{error}{notice}
<form method="post" action="/login">
  <label for="username">Username</label>
  <input id="username" name="username" required>
  <label for="password">Password</label>
  <input id="password" name="password" type="password" required>
  <button type="submit">Log in</button>
</form>
<p style="margin-top:1rem">No account? <a href="/register">Register</a></p>"#,
        error = flash(error, "error"),
        notice = flash(notice, "info"),
    );
    layout("Log in", &body)
}

pub fn register_page(error: Option<&str>) -> String {
    let body = format!(
        r#"<h1>Register</h1>
{error}
<form method="post" action="/register" enctype="multipart/form-data">
  <label for="username">Username</label>
  <input id="username" name="username" required>
  <label for="password">Password</label>
  <input id="password" name="password" type="password" required>
  <label for="face_image">Face photo (one clear, front-facing face)</label>
  <input id="face_image" name="face_image" type="file" accept="image/*" required>
  <button type="submit">Register</button>
</form>
<p style="margin-top:1rem">Already registered? <a href="/login">Log in</a></p>"#,
        error = flash(error, "error"),
    );
    layout("Register", &body)
}

fn presence_rows(page: &Page<PresenceRecord>) -> String {
    if page.items.is_empty() {
        return r#"<tr><td colspan="4">No presence recorded yet.</td></tr>"#.to_string();
    }
    let mut rows = String::new();
    for record in &page.items {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            format_timestamp(&record.timestamp),
            escape_html(&record.status),
            coordinate(record.latitude),
            coordinate(record.longitude),
        );
    }
    rows
}

fn pagination(page: &Page<PresenceRecord>) -> String {
    let mut nav = String::new();
    if page.has_prev() {
        let _ = write!(nav, r#"<a href="/?page={}">&larr; Newer</a> "#, page.page - 1);
    }
    let _ = write!(nav, "Page {} of {}", page.page, page.pages().max(1));
    if page.has_next() {
        let _ = write!(nav, r#" <a href="/?page={}">Older &rarr;</a>"#, page.page + 1);
    }
    nav
}

const CAPTURE_SCRIPT: &str = r#"
const button = document.getElementById('capture');
const result = document.getElementById('result');
button.addEventListener('click', () => {
  const preview = document.getElementById('preview');
  const canvas = document.createElement('canvas');
  canvas.width = preview.naturalWidth || 640;
  canvas.height = preview.naturalHeight || 480;
  canvas.getContext('2d').drawImage(preview, 0, 0, canvas.width, canvas.height);
  const send = (coords) => canvas.toBlob((blob) => {
    const form = new FormData();
    form.append('presence_capture', blob, 'capture.jpg');
    if (coords) {
      form.append('latitude', coords.latitude);
      form.append('longitude', coords.longitude);
    }
    fetch('/mark_presence', { method: 'POST', body: form })
      .then((r) => r.json())
      .then((body) => {
        result.textContent = body.message;
        if (body.status === 'success') setTimeout(() => location.reload(), 1500);
      })
      .catch(() => { result.textContent = 'Request failed.'; });
  }, 'image/jpeg');
  if (navigator.geolocation) {
    navigator.geolocation.getCurrentPosition((p) => send(p.coords), () => send(null));
  } else {
    send(null);
  }
});
"#;

pub fn dashboard_page(username: &str, history: &Page<PresenceRecord>) -> String {
    let body = format!(
        r#"<nav><h1>Welcome, {username}</h1><a href="/logout">Log out</a></nav>
<h2>Mark presence</h2>
<img id="preview" class="preview" src="/video_feed" alt="Camera preview">
<div><button id="capture" type="button">Capture &amp; mark presence</button></div>
<p id="result"></p>
<h2>History</h2>
<table>
  <thead><tr><th>Time (UTC)</th><th>Status</th><th>Latitude</th><th>Longitude</th></tr></thead>
  <tbody>
    {rows}
  </tbody>
</table>
<p>{pagination}</p>
<script>{CAPTURE_SCRIPT}</script>"#,
        username = escape_html(username),
        rows = presence_rows(history),
        pagination = pagination(history),
    );
    layout("Dashboard", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(status: &str, lat: Option<f64>) -> PresenceRecord {
        PresenceRecord {
            id: 1,
            user_id: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 5, 8, 9, 10).unwrap(),
            latitude: lat,
            longitude: lat,
            status: status.to_string(),
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html(r#"<b a="1">&'"#), "&lt;b a=&quot;1&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn dashboard_lists_records() {
        let page = Page {
            items: vec![
                record("Verified (Distance: 0.12)", Some(1.5)),
                record("Unverified (Distance: 0.80)", None),
            ],
            page: 1,
            per_page: 10,
            total: 2,
        };
        let html = dashboard_page("<alice>", &page);
        assert!(html.contains("Welcome, &lt;alice&gt;"));
        assert!(html.contains("2024-03-05 08:09:10"));
        assert!(html.contains("Verified (Distance: 0.12)"));
        assert!(html.contains("N/A"));
        assert!(html.contains(r#"src="/video_feed""#));
        assert!(!html.contains("Older"));
    }

    #[test]
    fn pagination_links() {
        let page: Page<PresenceRecord> = Page {
            items: vec![],
            page: 2,
            per_page: 10,
            total: 35,
        };
        let nav = pagination(&page);
        assert!(nav.contains("/?page=1"));
        assert!(nav.contains("Page 2 of 4"));
        assert!(nav.contains("/?page=3"));
    }

    #[test]
    fn login_shows_flash() {
        let html = login_page(Some("Please check your login details and try again."), None);
        assert!(html.contains(r#"class="flash error""#));
        assert!(!html.contains(r#"class="flash info""#));
    }
}
