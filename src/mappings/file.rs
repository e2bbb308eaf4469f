//! Bidirectional name-mapping model
//!
//! A `MappingFile` maps class/field/method names between two namespaces.
//! The canonical direction after loading is deobf → obf: `original` is the
//! readable name, `mapped` the obfuscated one, and descriptors are carried
//! for both sides.

use std::collections::{BTreeMap, HashSet};

/// A field or method mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberMapping {
    pub original: String,
    /// JVM descriptor in the `original` namespace; empty for fields in
    /// formats that omit field types
    pub descriptor: String,
    pub mapped: String,
    /// JVM descriptor in the `mapped` namespace
    pub mapped_descriptor: String,
}

impl MemberMapping {
    /// Comparison key used by the superset check
    pub fn signature(&self) -> String {
        format!(
            "{} {} -> {} {}",
            self.original, self.descriptor, self.mapped, self.mapped_descriptor
        )
    }

    fn reversed(&self) -> Self {
        Self {
            original: self.mapped.clone(),
            descriptor: self.mapped_descriptor.clone(),
            mapped: self.original.clone(),
            mapped_descriptor: self.descriptor.clone(),
        }
    }
}

/// All member mappings of one class
#[derive(Debug, Clone, Default)]
pub struct ClassMapping {
    /// Internal (slash-separated) name in the `original` namespace
    pub original: String,
    /// Internal name in the `mapped` namespace
    pub mapped: String,
    pub fields: Vec<MemberMapping>,
    pub methods: Vec<MemberMapping>,
}

/// A whole mapping file, keyed by original class name
#[derive(Debug, Clone, Default)]
pub struct MappingFile {
    classes: BTreeMap<String, ClassMapping>,
}

impl MappingFile {
    pub fn insert(&mut self, class: ClassMapping) {
        self.classes.insert(class.original.clone(), class);
    }

    pub fn class(&self, original: &str) -> Option<&ClassMapping> {
        self.classes.get(original)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassMapping> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Swap the two namespaces
    pub fn reverse(&self) -> MappingFile {
        let mut out = MappingFile::default();
        for class in self.classes.values() {
            out.insert(ClassMapping {
                original: class.mapped.clone(),
                mapped: class.original.clone(),
                fields: class.fields.iter().map(MemberMapping::reversed).collect(),
                methods: class.methods.iter().map(MemberMapping::reversed).collect(),
            });
        }
        out
    }

    /// The set of mapped-namespace class names (the obfuscated side in the
    /// canonical direction), for filtering jar entries.
    pub fn mapped_class_names(&self) -> HashSet<String> {
        self.classes.values().map(|c| c.mapped.clone()).collect()
    }

    /// Serialize in TSRG2 form, `original` namespace on the left
    pub fn to_tsrg2(&self) -> String {
        let mut out = String::from("tsrg2 left right\n");
        for class in self.classes.values() {
            out.push_str(&class.original);
            out.push(' ');
            out.push_str(&class.mapped);
            out.push('\n');
            for field in &class.fields {
                out.push('\t');
                out.push_str(&field.original);
                out.push(' ');
                out.push_str(&field.mapped);
                out.push('\n');
            }
            for method in &class.methods {
                out.push('\t');
                out.push_str(&method.original);
                out.push(' ');
                out.push_str(&method.descriptor);
                out.push(' ');
                out.push_str(&method.mapped);
                out.push('\n');
            }
        }
        out
    }
}

/// Check that `client` is a strict superset of `server`: every server
/// class must exist in the client with the same original and mapped names,
/// and the server's field/method signature sets must be subsets of the
/// client's.
pub fn is_superset(client: &MappingFile, server: &MappingFile) -> bool {
    for server_class in server.classes() {
        let Some(client_class) = client.class(&server_class.original) else {
            return false;
        };
        if client_class.mapped != server_class.mapped {
            return false;
        }

        let client_fields: HashSet<String> = client_class
            .fields
            .iter()
            .map(MemberMapping::signature)
            .collect();
        let client_methods: HashSet<String> = client_class
            .methods
            .iter()
            .map(MemberMapping::signature)
            .collect();

        if !server_class
            .fields
            .iter()
            .all(|f| client_fields.contains(&f.signature()))
        {
            return false;
        }
        if !server_class
            .methods
            .iter()
            .all(|m| client_methods.contains(&m.signature()))
        {
            return false;
        }
    }
    true
}
