//! Decision reply → `Action`.
//!
//! Replies are loosely formatted, so the JSON object is located with a
//! three-stage fallback: the whole reply, then a fenced code block, then the
//! first balanced `{...}` span. The first candidate that parses as a JSON
//! object wins.
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::agent_engine::state::Action;
use crate::errors::{PilotError, PilotResult};

const DEFAULT_SWIPE_MS: i64 = 300;
const DEFAULT_LONG_CLICK_MS: i64 = 1000;
const DEFAULT_WAIT_MS: i64 = 1000;
const MISSING_COORD: i32 = -1;

/// Dotted Java-style package name, e.g. `com.android.settings`. Anything else
/// is refused before it can reach a shell command line.
pub fn is_package_name(candidate: &str) -> bool {
    static PACKAGE: OnceLock<Regex> = OnceLock::new();
    PACKAGE
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)+$").expect("static package regex")
        })
        .is_match(candidate)
}

/// Parses and validates a reply in one go.
pub fn parse_and_validate(reply: &str) -> PilotResult<Action> {
    let action = parse_reply(reply)?;
    validate(&action)?;
    Ok(action)
}

pub fn parse_reply(reply: &str) -> PilotResult<Action> {
    let object = locate_json_object(reply)?;
    Ok(action_from_object(&object))
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let mut out: String = flat.chars().take(120).collect();
    if flat.chars().count() > 120 {
        out.push('…');
    }
    out
}

fn locate_json_object(reply: &str) -> PilotResult<Map<String, Value>> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(PilotError::EmptyReply);
    }

    let candidates = [
        Some(trimmed),
        fenced_block(trimmed),
        first_brace_span(trimmed),
    ];

    let mut last_error: Option<String> = None;
    for candidate in candidates.into_iter().flatten() {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(_) => last_error = Some("JSON is not an object".into()),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    let reason = last_error.unwrap_or_else(|| "no JSON object found".into());
    tracing::warn!(reply = %preview(trimmed), reason = %reason, "unparsable decision reply");
    Err(PilotError::ReplyParse(format!("{reason} in reply: {}", preview(trimmed))))
}

/// Content of the first ``` fence, with an optional `json` language tag.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let after = after
        .strip_prefix("json")
        .or_else(|| after.strip_prefix("JSON"))
        .unwrap_or(after);
    let end = after.find("```")?;
    Some(after[..end].trim())
}

/// First `{` through its matching `}`, honouring string literals and escapes.
fn first_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// `longClick` → `long_click`.
fn to_snake_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    for (i, ch) in raw.trim().chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '-' || ch == ' ' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    out
}

fn int_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    })
}

fn coord(obj: &Map<String, Value>, keys: &[&str]) -> i32 {
    int_field(obj, keys)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(MISSING_COORD)
}

fn duration(obj: &Map<String, Value>, default_ms: i64) -> i64 {
    int_field(obj, &["duration", "duration_ms", "durationMs"]).unwrap_or(default_ms)
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str).map(str::to_string))
}

fn action_from_object(obj: &Map<String, Value>) -> Action {
    let raw_kind = str_field(obj, &["action", "type"]).unwrap_or_default();
    match to_snake_case(&raw_kind).as_str() {
        "click" | "tap" => Action::Click {
            x: coord(obj, &["x"]),
            y: coord(obj, &["y"]),
        },
        "long_click" | "long_press" => Action::LongClick {
            x: coord(obj, &["x"]),
            y: coord(obj, &["y"]),
            duration_ms: duration(obj, DEFAULT_LONG_CLICK_MS),
        },
        "swipe" => Action::Swipe {
            from_x: coord(obj, &["from_x", "fromX"]),
            from_y: coord(obj, &["from_y", "fromY"]),
            to_x: coord(obj, &["to_x", "toX"]),
            to_y: coord(obj, &["to_y", "toY"]),
            duration_ms: duration(obj, DEFAULT_SWIPE_MS),
        },
        "input" | "type" | "input_text" => Action::Input {
            text: str_field(obj, &["text"]).unwrap_or_default(),
        },
        "press_key" | "key" => Action::PressKey {
            key_code: int_field(obj, &["key_code", "keyCode"])
                .and_then(|v| i32::try_from(v).ok())
                .unwrap_or(0),
            key_name: str_field(obj, &["key_name", "keyName"]).unwrap_or_default(),
        },
        "open_app" | "launch_app" => Action::OpenApp {
            app_id: str_field(obj, &["package", "package_name", "packageName", "app_id", "appId"])
                .unwrap_or_default(),
            app_name: str_field(obj, &["app_name", "appName"]).unwrap_or_default(),
        },
        "wait" => Action::Wait {
            duration_ms: duration(obj, DEFAULT_WAIT_MS),
        },
        "go_back" | "back" => Action::GoBack,
        "complete" | "done" | "finish" => Action::Complete {
            message: str_field(obj, &["message"]).unwrap_or_else(|| "Task completed".into()),
        },
        "error" => Action::Error {
            message: str_field(obj, &["message"]).unwrap_or_else(|| "Unknown error".into()),
            recoverable: obj.get("recoverable").and_then(Value::as_bool).unwrap_or(false),
        },
        "request_user_help" | "user_help" => Action::RequestUserHelp {
            reason: str_field(obj, &["reason", "message"]).unwrap_or_default(),
        },
        _ => {
            let shown = if raw_kind.is_empty() { "<missing>" } else { raw_kind.as_str() };
            tracing::warn!(kind = %shown, "unknown action type in reply");
            Action::Error {
                message: format!("Unknown action type: {shown}"),
                recoverable: false,
            }
        }
    }
}

/// Per-variant structural checks. Never corrects an action.
pub fn validate(action: &Action) -> PilotResult<()> {
    let invalid = |msg: String| Err(PilotError::InvalidAction(msg));
    match action {
        Action::Click { x, y } | Action::LongClick { x, y, .. } if *x < 0 || *y < 0 => {
            invalid(format!("negative coordinates ({x}, {y})"))
        }
        Action::Swipe {
            from_x,
            from_y,
            to_x,
            to_y,
            ..
        } if [from_x, from_y, to_x, to_y].iter().any(|v| **v < 0) => invalid(format!(
            "negative swipe coordinates ({from_x}, {from_y}) -> ({to_x}, {to_y})"
        )),
        Action::LongClick { duration_ms, .. }
        | Action::Swipe { duration_ms, .. }
        | Action::Wait { duration_ms }
            if *duration_ms <= 0 =>
        {
            invalid(format!("duration must be positive, got {duration_ms}ms"))
        }
        Action::Input { text } if text.trim().is_empty() => invalid("input text is blank".into()),
        Action::PressKey { key_code, .. } if *key_code <= 0 => {
            invalid(format!("key code must be positive, got {key_code}"))
        }
        Action::OpenApp { app_id, .. } if app_id.trim().is_empty() => {
            invalid("app identifier is blank".into())
        }
        Action::OpenApp { app_id, .. } if !is_package_name(app_id) => {
            invalid(format!("not a package name: {app_id:?}"))
        }
        _ => Ok(()),
    }
}
