//! Structural compatibility between producer and consumer schemas
//!
//! `compatible(producer, consumer)` holds iff every value satisfying the
//! producer also satisfies the consumer. Used at compile time to reject
//! workflow wiring that cannot type-check regardless of runtime data.
//!
//! `format` is a refinement: a consumer without a format accepts any
//! producer string; a consumer with a format requires the producer to
//! declare the identical format.

use super::Schema;

/// One reason a producer schema fails to satisfy a consumer schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incompatibility {
    /// Field path relative to the compared roots, e.g. `user.email`
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "at '{}': {}", self.path, self.reason)
        }
    }
}

/// Check that every value satisfying `producer` satisfies `consumer`.
///
/// Returns every incompatibility with its field path; empty means
/// compatible.
pub fn compatible(producer: &Schema, consumer: &Schema) -> Vec<Incompatibility> {
    let mut out = Vec::new();
    check_at(producer, consumer, "", &mut out);
    out
}

fn check_at(producer: &Schema, consumer: &Schema, path: &str, out: &mut Vec<Incompatibility>) {
    match (producer, consumer) {
        // `any` consumer accepts every producer; `any` producer can hold
        // values no typed consumer admits.
        (_, Schema::Any) => {}
        (Schema::Any, _) => out.push(Incompatibility {
            path: path.to_string(),
            reason: format!(
                "producer is 'any', which cannot be proven to satisfy {}",
                consumer.describe()
            ),
        }),

        (
            Schema::Object {
                properties: p_props,
                required: p_required,
            },
            Schema::Object {
                properties: c_props,
                required: c_required,
            },
        ) => {
            for name in c_required {
                if !p_props.contains_key(name) || !p_required.contains(name) {
                    out.push(Incompatibility {
                        path: join(path, name),
                        reason: "property is required by the consumer but not guaranteed by the producer".to_string(),
                    });
                }
            }
            for (name, c_child) in c_props {
                if let Some(p_child) = p_props.get(name) {
                    check_at(p_child, c_child, &join(path, name), out);
                }
            }
        }

        (Schema::Array { items: p_items }, Schema::Array { items: c_items }) => {
            check_at(p_items, c_items, &format!("{path}[]"), out);
        }

        (
            Schema::String {
                format: p_format,
                enumeration: p_enum,
            },
            Schema::String {
                format: c_format,
                enumeration: c_enum,
            },
        ) => {
            if let Some(c_format) = c_format {
                if p_format.as_deref() != Some(c_format) {
                    out.push(Incompatibility {
                        path: path.to_string(),
                        reason: format!(
                            "consumer requires format '{c_format}' but producer declares {}",
                            p_format.as_deref().map_or("none".to_string(), |f| format!("'{f}'"))
                        ),
                    });
                }
            }
            if let Some(c_enum) = c_enum {
                match p_enum {
                    None => out.push(Incompatibility {
                        path: path.to_string(),
                        reason: "consumer restricts values to an enum but producer is unconstrained".to_string(),
                    }),
                    Some(p_enum) => {
                        let missing: Vec<&str> = p_enum
                            .iter()
                            .filter(|v| !c_enum.contains(v))
                            .map(String::as_str)
                            .collect();
                        if !missing.is_empty() {
                            out.push(Incompatibility {
                                path: path.to_string(),
                                reason: format!(
                                    "producer may yield [{}], outside the consumer's enum",
                                    missing.join(", ")
                                ),
                            });
                        }
                    }
                }
            }
        }

        (
            Schema::Integer {
                minimum: p_min,
                maximum: p_max,
            }
            | Schema::Number {
                minimum: p_min,
                maximum: p_max,
            },
            Schema::Number {
                minimum: c_min,
                maximum: c_max,
            },
        ) => {
            // Every integer is a number, so integer -> number widens soundly.
            check_range(*p_min, *p_max, *c_min, *c_max, path, out);
        }

        (
            Schema::Integer {
                minimum: p_min,
                maximum: p_max,
            },
            Schema::Integer {
                minimum: c_min,
                maximum: c_max,
            },
        ) => {
            check_range(*p_min, *p_max, *c_min, *c_max, path, out);
        }

        (Schema::Boolean, Schema::Boolean) => {}

        (p, c) => out.push(Incompatibility {
            path: path.to_string(),
            reason: format!("producer is {} but consumer expects {}", p.describe(), c.describe()),
        }),
    }
}

fn check_range(
    p_min: Option<f64>,
    p_max: Option<f64>,
    c_min: Option<f64>,
    c_max: Option<f64>,
    path: &str,
    out: &mut Vec<Incompatibility>,
) {
    if let Some(c_min) = c_min {
        let holds = p_min.is_some_and(|p| p >= c_min);
        if !holds {
            out.push(Incompatibility {
                path: path.to_string(),
                reason: format!(
                    "consumer requires minimum {c_min} but producer's lower bound is {}",
                    p_min.map_or("unbounded".to_string(), |p| p.to_string())
                ),
            });
        }
    }
    if let Some(c_max) = c_max {
        let holds = p_max.is_some_and(|p| p <= c_max);
        if !holds {
            out.push(Incompatibility {
                path: path.to_string(),
                reason: format!(
                    "consumer requires maximum {c_max} but producer's upper bound is {}",
                    p_max.map_or("unbounded".to_string(), |p| p.to_string())
                ),
            });
        }
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}
