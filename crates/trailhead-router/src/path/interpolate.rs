/// Filling route patterns with param values
use crate::path::join_paths;
use crate::path::matcher::{SPLAT_KEY, STAR_KEY};
use crate::path::segment::{classify_segment, SegmentKind};
use crate::Params;
use serde_json::Value;

/// Flags for [`interpolate_path`]
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpolateOptions {
    /// Keep `$`/`{$}` placeholders (and missing optional placeholders) in the output
    pub leave_wildcards: bool,
    /// Keep required `$name` placeholders instead of substituting values
    pub leave_params: bool,
}

impl InterpolateOptions {
    pub fn leave_wildcards() -> Self {
        Self {
            leave_wildcards: true,
            leave_params: false,
        }
    }
}

/// Result of [`interpolate_path`]
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolated {
    pub path: String,
    /// Params the pattern actually referenced
    pub used_params: Params,
    /// A required param or the splat had no value
    pub is_missing_params: bool,
}

/// Substitute params into a route pattern
///
/// Param values are percent-encoded as URI components; a splat keeps its
/// `/` separators. Missing required params render as `undefined`, missing
/// optional params drop out (keeping any literal affix).
///
/// # Examples
///
/// ```
/// use trailhead_router::path::{interpolate_path, InterpolateOptions};
/// use serde_json::json;
///
/// let params = json!({"postId": "hello world", "_splat": "a/b"});
/// let params = params.as_object().unwrap();
///
/// let out = interpolate_path("/posts/$postId/files/$", params, InterpolateOptions::default());
/// assert_eq!(out.path, "/posts/hello%20world/files/a/b");
/// assert!(!out.is_missing_params);
///
/// let out = interpolate_path("/docs/{-$lang}/intro", params, InterpolateOptions::default());
/// assert_eq!(out.path, "/docs/intro");
/// ```
pub fn interpolate_path(path: &str, params: &Params, options: InterpolateOptions) -> Interpolated {
    if path.is_empty() {
        return Interpolated {
            path: "/".to_string(),
            used_params: Params::new(),
            is_missing_params: false,
        };
    }

    let mut used_params = Params::new();
    let mut is_missing_params = false;
    let mut parts: Vec<String> = Vec::new();

    for part in path.split('/') {
        let segment = classify_segment(part);
        let prefix = segment.prefix.as_deref().unwrap_or("");
        let suffix = segment.suffix.as_deref().unwrap_or("");

        match segment.kind {
            SegmentKind::Static => parts.push(part.to_string()),

            SegmentKind::Wildcard => {
                let splat = params.get(SPLAT_KEY).or_else(|| params.get(STAR_KEY));
                let splat_value = splat.cloned().unwrap_or(Value::Null);
                used_params.insert(SPLAT_KEY.to_string(), splat_value.clone());
                used_params.insert(STAR_KEY.to_string(), splat_value);

                match splat.and_then(param_to_string).filter(|s| !s.is_empty()) {
                    Some(value) => {
                        let value = encode_splat(&value);
                        if options.leave_wildcards {
                            let marker = if segment.has_affix() { "{$}" } else { "$" };
                            parts.push(format!("{}{}{}{}", prefix, marker, value, suffix));
                        } else {
                            parts.push(format!("{}{}{}", prefix, value, suffix));
                        }
                    }
                    None => {
                        is_missing_params = true;
                        if segment.has_affix() {
                            if options.leave_wildcards {
                                parts.push(format!("{}{{$}}{}", prefix, suffix));
                            } else {
                                parts.push(format!("{}{}", prefix, suffix));
                            }
                        }
                    }
                }
            }

            SegmentKind::Param => {
                let key = segment.param_name().unwrap_or_default();
                let value = params.get(key);
                if value.is_none() {
                    is_missing_params = true;
                }
                used_params.insert(key.to_string(), value.cloned().unwrap_or(Value::Null));

                if options.leave_params {
                    parts.push(part.to_string());
                } else {
                    let rendered = value
                        .and_then(param_to_string)
                        .map(|v| urlencoding::encode(&v).into_owned())
                        .unwrap_or_else(|| "undefined".to_string());
                    parts.push(format!("{}{}{}", prefix, rendered, suffix));
                }
            }

            SegmentKind::OptionalParam => {
                let key = segment.param_name().unwrap_or_default();
                match params.get(key).and_then(param_to_string) {
                    Some(value) => {
                        used_params.insert(key.to_string(), params[key].clone());
                        let value = urlencoding::encode(&value);
                        parts.push(format!("{}{}{}", prefix, value, suffix));
                    }
                    None => {
                        if options.leave_wildcards {
                            parts.push(part.to_string());
                        } else if segment.has_affix() {
                            parts.push(format!("{}{}", prefix, suffix));
                        }
                    }
                }
            }
        }
    }

    let joined = join_paths(parts.iter().map(String::as_str));

    Interpolated {
        path: if joined.is_empty() { "/".to_string() } else { joined },
        used_params,
        is_missing_params,
    }
}

/// Render a param value as path text; `null` counts as absent
pub(crate) fn param_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => serde_json::to_string(other).ok(),
    }
}

fn encode_splat(value: &str) -> String {
    value
        .split('/')
        .map(|piece| urlencoding::encode(piece).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
