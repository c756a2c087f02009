use indexmap::IndexMap;

use crate::error::StrataError;
use crate::value::Value;

mod pattern;
mod scope;

use scope::Scope;

/// Reserved mapping key holding that level's variable definitions. It is
/// consumed as scope metadata and never appears in the output.
pub const DEFINES_KEY: &str = "defines";

/// Interpolates every `${name}` / `$name` reference in the tree, resolving
/// names through lexically-scoped `defines` entries, then enclosing scopes,
/// then the process environment.
///
/// The output tree has the same shape as the input, minus the `defines`
/// keys. The pass is all-or-nothing: any unresolvable reference or cyclic
/// definition aborts it.
///
/// # Examples
/// ```
/// use strata_cfg::{interpolate, Value};
///
/// let tree = Value::from(serde_json::json!({
///     "defines": { "prefix": "/opt/app" },
///     "bin": "${prefix}/bin",
/// }));
/// let out = interpolate(&tree)?;
/// assert_eq!(out, Value::from(serde_json::json!({ "bin": "/opt/app/bin" })));
/// # Ok::<(), strata_cfg::StrataError>(())
/// ```
pub fn interpolate(node: &Value) -> Result<Value, StrataError> {
    let root = Scope::new(None);
    interpolate_node(node, &root)
}

fn interpolate_node(node: &Value, parent: &Scope<'_>) -> Result<Value, StrataError> {
    match node {
        Value::Mapping(entries) => {
            let scope = match entries.get(DEFINES_KEY) {
                None => Scope::new(Some(parent)),
                Some(Value::Mapping(defines)) => Scope::with_defines(defines, Some(parent)),
                Some(_) => {
                    return Err(StrataError::InvalidDefines {
                        path: vec![DEFINES_KEY.to_string()],
                    });
                }
            };

            let mut interpolated = IndexMap::with_capacity(entries.len());
            for (key, value) in entries {
                if key == DEFINES_KEY {
                    continue;
                }
                let resolved = interpolate_node(value, &scope)
                    .map_err(|e| e.push_path_segment(key))?;
                interpolated.insert(key.clone(), resolved);
            }
            Ok(Value::Mapping(interpolated))
        }

        Value::Sequence(items) => {
            // Sequences are transparent for scoping: each element gets its
            // own empty scope chained directly to the enclosing mapping's.
            let mut interpolated = Vec::with_capacity(items.len());
            for item in items {
                let scope = Scope::new(Some(parent));
                interpolated.push(interpolate_node(item, &scope)?);
            }
            Ok(Value::Sequence(interpolated))
        }

        Value::String(text) if !text.is_empty() => {
            pattern::substitute(text, |name| parent.value_of(name))
                .map_err(|e| e.push_path_segment(text))
        }

        other => Ok(other.clone()),
    }
}
