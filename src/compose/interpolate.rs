//! `${VAR}`-style variable interpolation for compose documents.

use std::collections::HashMap;

use regex::Regex;

use crate::error::ComposeError;

const REFERENCE_PATTERN: &str = r"\$(?:(\$)|\{([^}]*)\}|([A-Za-z_][A-Za-z0-9_]*))";
const NAME_PATTERN: &str = r"(?s)^([A-Za-z_][A-Za-z0-9_]*)(.*)$";

/// Substitute variable references in `input`.
///
/// Supports `$VAR`, `${VAR}`, `${VAR:-default}` (unset or empty),
/// `${VAR-default}` (unset), `${VAR:?message}` and `${VAR?message}` (fail
/// when missing) and the `$$` escape. Variables are looked up in `overrides`
/// first, then the process environment; unknown variables expand to the
/// empty string.
///
/// # Errors
///
/// Returns `ComposeError::Interpolation` for malformed references and for
/// `?`-style references whose variable is missing.
pub fn interpolate<E: mockable::Env>(
    input: &str,
    overrides: &HashMap<String, String>,
    env: &E,
) -> Result<String, ComposeError> {
    let reference = compile(REFERENCE_PATTERN)?;
    let name = compile(NAME_PATTERN)?;
    let lookup = |var: &str| {
        overrides
            .get(var)
            .cloned()
            .or_else(|| env.string(var))
    };
    expand(input, &reference, &name, &lookup)
}

fn compile(pattern: &str) -> Result<Regex, ComposeError> {
    Regex::new(pattern).map_err(|e| ComposeError::Interpolation {
        message: e.to_string(),
    })
}

fn expand(
    input: &str,
    reference: &Regex,
    name: &Regex,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ComposeError> {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;

    for captures in reference.captures_iter(input) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        output.push_str(input.get(last..whole.start()).unwrap_or_default());
        last = whole.end();

        if captures.get(1).is_some() {
            output.push('$');
        } else if let Some(bare) = captures.get(3) {
            output.push_str(&lookup(bare.as_str()).unwrap_or_default());
        } else if let Some(braced) = captures.get(2) {
            let value = expand_braced(braced.as_str(), reference, name, lookup)?;
            output.push_str(&value);
        }
    }

    output.push_str(input.get(last..).unwrap_or_default());
    Ok(output)
}

fn expand_braced(
    body: &str,
    reference: &Regex,
    name: &Regex,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ComposeError> {
    let invalid = || ComposeError::Interpolation {
        message: format!("invalid interpolation format for '${{{body}}}'"),
    };
    let captures = name.captures(body).ok_or_else(invalid)?;
    let var = captures.get(1).map_or("", |m| m.as_str());
    let modifier = captures.get(2).map_or("", |m| m.as_str());
    let value = lookup(var);

    if modifier.is_empty() {
        return Ok(value.unwrap_or_default());
    }

    let missing_or_empty = value.as_deref().is_none_or(str::is_empty);
    if let Some(default) = modifier.strip_prefix(":-") {
        return if missing_or_empty {
            expand(default, reference, name, lookup)
        } else {
            Ok(value.unwrap_or_default())
        };
    }
    if let Some(default) = modifier.strip_prefix('-') {
        return match value {
            Some(set) => Ok(set),
            None => expand(default, reference, name, lookup),
        };
    }
    if let Some(message) = modifier.strip_prefix(":?") {
        return if missing_or_empty {
            Err(required(var, message))
        } else {
            Ok(value.unwrap_or_default())
        };
    }
    if let Some(message) = modifier.strip_prefix('?') {
        return value.ok_or_else(|| required(var, message));
    }
    Err(invalid())
}

fn required(var: &str, message: &str) -> ComposeError {
    let detail = if message.is_empty() {
        String::from("is required")
    } else {
        String::from(message)
    };
    ComposeError::Interpolation {
        message: format!("variable {var} {detail}"),
    }
}
