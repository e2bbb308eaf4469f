//! ProGuard mapping parser
//!
//! Upstream side mappings are ProGuard obfuscation logs: readable names on
//! the left, obfuscated on the right, with members written in Java type
//! syntax rather than JVM descriptors.
//!
//! ```text
//! com.mojang.math.Matrix4f -> b:
//!     float m00 -> a
//!     17:20:void load(com.mojang.math.Matrix4f) -> a
//! ```
//!
//! Parsing yields a [`MappingFile`] whose `original` namespace is the
//! obfuscated one (what the shipped jar actually contains); callers
//! `reverse()` it into the canonical deobf → obf direction.

use thiserror::Error;

use super::file::{ClassMapping, MappingFile, MemberMapping};

#[derive(Debug, Error)]
pub enum ProguardError {
    #[error("line {line}: member mapping outside any class")]
    MemberOutsideClass { line: usize },

    #[error("line {line}: malformed mapping entry: {text}")]
    Malformed { line: usize, text: String },
}

/// Parse ProGuard mapping text.
///
/// Two passes: class name pairs are collected first so member descriptors
/// can be rewritten into the obfuscated namespace while reading members.
pub fn parse(text: &str) -> Result<MappingFile, ProguardError> {
    // Pass 1: class name pairs, readable → obfuscated, internal form
    let mut class_names = std::collections::HashMap::new();
    for line in text.lines() {
        if is_skippable(line) || line.starts_with(char::is_whitespace) {
            continue;
        }
        if let Some((readable, obf)) = split_class_line(line) {
            class_names.insert(internal(&readable), internal(&obf));
        }
    }

    let remap = |readable_desc: &str| remap_descriptor(readable_desc, &class_names);

    // Pass 2: build classes with members
    let mut file = MappingFile::default();
    let mut current: Option<ClassMapping> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        if is_skippable(raw) {
            continue;
        }

        if !raw.starts_with(char::is_whitespace) {
            let (readable, obf) = split_class_line(raw).ok_or_else(|| ProguardError::Malformed {
                line: line_no,
                text: raw.to_string(),
            })?;
            if let Some(done) = current.take() {
                file.insert(done);
            }
            // original namespace = obfuscated, per module contract
            current = Some(ClassMapping {
                original: internal(&obf),
                mapped: internal(&readable),
                fields: Vec::new(),
                methods: Vec::new(),
            });
            continue;
        }

        let class = current
            .as_mut()
            .ok_or(ProguardError::MemberOutsideClass { line: line_no })?;

        let entry = raw.trim();
        let (left, obf_name) = entry.rsplit_once(" -> ").ok_or_else(|| ProguardError::Malformed {
            line: line_no,
            text: raw.to_string(),
        })?;

        // Strip the optional `startLine:endLine:` prefix on methods
        let left = strip_line_numbers(left);

        let (java_type, name_and_args) =
            left.split_once(' ').ok_or_else(|| ProguardError::Malformed {
                line: line_no,
                text: raw.to_string(),
            })?;

        if let Some((name, args)) = split_method(name_and_args) {
            let readable_desc = method_descriptor(&args, java_type);
            class.methods.push(MemberMapping {
                original: obf_name.to_string(),
                descriptor: remap(&readable_desc),
                mapped: name.to_string(),
                mapped_descriptor: readable_desc,
            });
        } else {
            let readable_desc = type_descriptor(java_type);
            class.fields.push(MemberMapping {
                original: obf_name.to_string(),
                descriptor: remap(&readable_desc),
                mapped: name_and_args.to_string(),
                mapped_descriptor: readable_desc,
            });
        }
    }

    if let Some(done) = current.take() {
        file.insert(done);
    }
    Ok(file)
}

fn is_skippable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn split_class_line(line: &str) -> Option<(String, String)> {
    let line = line.trim_end();
    let stripped = line.strip_suffix(':')?;
    let (readable, obf) = stripped.split_once(" -> ")?;
    Some((readable.trim().to_string(), obf.trim().to_string()))
}

fn strip_line_numbers(left: &str) -> &str {
    // `17:20:void load(...)` — both prefixes are decimal line numbers
    let mut rest = left;
    for _ in 0..2 {
        if let Some((head, tail)) = rest.split_once(':') {
            if !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()) {
                rest = tail;
                continue;
            }
        }
        break;
    }
    rest
}

fn split_method(name_and_args: &str) -> Option<(String, String)> {
    let open = name_and_args.find('(')?;
    let close = name_and_args.rfind(')')?;
    Some((
        name_and_args[..open].to_string(),
        name_and_args[open + 1..close].to_string(),
    ))
}

fn internal(java_name: &str) -> String {
    java_name.replace('.', "/")
}

/// Java type name → JVM descriptor
fn type_descriptor(java_type: &str) -> String {
    let mut base = java_type;
    let mut dims = 0;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped;
        dims += 1;
    }

    let mut out = "[".repeat(dims);
    out.push_str(&match base {
        "void" => "V".to_string(),
        "boolean" => "Z".to_string(),
        "byte" => "B".to_string(),
        "char" => "C".to_string(),
        "short" => "S".to_string(),
        "int" => "I".to_string(),
        "long" => "J".to_string(),
        "float" => "F".to_string(),
        "double" => "D".to_string(),
        other => format!("L{};", internal(other)),
    });
    out
}

fn method_descriptor(args: &str, return_type: &str) -> String {
    let mut out = String::from("(");
    if !args.trim().is_empty() {
        for arg in args.split(',') {
            out.push_str(&type_descriptor(arg.trim()));
        }
    }
    out.push(')');
    out.push_str(&type_descriptor(return_type));
    out
}

/// Rewrite every `L<name>;` in a descriptor through the readable → obf
/// class map; unmapped names (JDK types, library types) pass through.
fn remap_descriptor(
    desc: &str,
    class_names: &std::collections::HashMap<String, String>,
) -> String {
    let mut out = String::with_capacity(desc.len());
    let mut rest = desc;
    while let Some(start) = rest.find('L') {
        let Some(end) = rest[start..].find(';') else {
            break;
        };
        out.push_str(&rest[..=start]);
        let name = &rest[start + 1..start + end];
        match class_names.get(name) {
            Some(mapped) => out.push_str(mapped),
            None => out.push_str(name),
        }
        out.push(';');
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# official mappings sample
com.mojang.math.Matrix4f -> b:
    float m00 -> a
    com.mojang.math.Matrix4f[] pool -> b
    17:20:void load(com.mojang.math.Matrix4f) -> a
    boolean isIdentity() -> b
com.mojang.Unit -> c:
";

    #[test]
    fn test_parse_classes_obf_original() {
        let file = parse(SAMPLE).unwrap();
        assert_eq!(file.len(), 2);
        let class = file.class("b").unwrap();
        assert_eq!(class.mapped, "com/mojang/math/Matrix4f");
        assert_eq!(class.fields.len(), 2);
        assert_eq!(class.methods.len(), 2);
    }

    #[test]
    fn test_descriptors_remapped_to_obf_side() {
        let file = parse(SAMPLE).unwrap();
        let class = file.class("b").unwrap();
        let load = class.methods.iter().find(|m| m.mapped == "load").unwrap();
        assert_eq!(load.descriptor, "(Lb;)V");
        assert_eq!(load.mapped_descriptor, "(Lcom/mojang/math/Matrix4f;)V");
        assert_eq!(load.original, "a");

        let pool = class.fields.iter().find(|f| f.mapped == "pool").unwrap();
        assert_eq!(pool.descriptor, "[Lb;");
        assert_eq!(pool.mapped_descriptor, "[Lcom/mojang/math/Matrix4f;");
    }

    #[test]
    fn test_line_number_prefix_stripped() {
        let file = parse(SAMPLE).unwrap();
        let class = file.class("b").unwrap();
        assert!(class.methods.iter().any(|m| m.mapped == "load"));
    }

    #[test]
    fn test_reverse_gives_canonical_direction() {
        let canonical = parse(SAMPLE).unwrap().reverse();
        let class = canonical.class("com/mojang/math/Matrix4f").unwrap();
        assert_eq!(class.mapped, "b");
        let load = class.methods.iter().find(|m| m.original == "load").unwrap();
        assert_eq!(load.descriptor, "(Lcom/mojang/math/Matrix4f;)V");
        assert_eq!(load.mapped_descriptor, "(Lb;)V");
        assert!(canonical.mapped_class_names().contains("b"));
    }

    #[test]
    fn test_member_outside_class_rejected() {
        let err = parse("    float m00 -> a\n").unwrap_err();
        assert!(matches!(err, ProguardError::MemberOutsideClass { line: 1 }));
    }

    #[test]
    fn test_primitive_descriptors() {
        let text = "a.B -> x:\n    double[] values(int,long) -> v\n";
        let file = parse(text).unwrap();
        let method = &file.class("x").unwrap().methods[0];
        assert_eq!(method.mapped_descriptor, "(IJ)[D");
    }
}
