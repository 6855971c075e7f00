use serde_json::Value;

/// Deep-merges `partial` over `base` and returns the result.
///
/// Objects merge key by key, recursively; any other value in `partial`
/// (scalars, arrays, null) replaces the value in `base`. The function is pure
/// and associative: `merge(merge(a, b), c) == merge(a, merge(b, c))`.
pub fn merge(base: &Value, partial: &Value) -> Value {
    match (base, partial) {
        (Value::Object(b), Value::Object(p)) => {
            let mut out = b.clone();
            for (key, pv) in p {
                let merged = match out.get(key) {
                    Some(bv) => merge(bv, pv),
                    None => pv.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        (_, p) => p.clone(),
    }
}
