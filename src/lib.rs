use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{info, warn};

pub mod cbor;
pub mod collection;
pub mod error;
pub mod format;
pub mod header;
pub mod identity;
pub mod stream;
pub mod xml;

pub use collection::UswidCollection;
pub use error::UswidError;
pub use format::FileFormat;
pub use header::{LocatedContainer, UswidHeader, HEADER_LEN, HEADER_VERSION, USWID_MAGIC};
pub use identity::{
    generate_tag_id, Entity, File, HashEntry, Link, Payload, Rel, Role, SoftwareIdentity,
    SoftwareMeta, TagId, VersionScheme,
};

/// How parent/child `requires` links are added while loading
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParentPolicy {
    #[default]
    None,
    /// A separate single-tag source that requires every loaded tag and is
    /// appended after them
    ParentFile(PathBuf),
    /// The first tag of the whole collection requires all the others
    FirstOfCollection,
    /// Within each source, its first tag requires the rest of that source
    FirstOfEachSource,
}

#[derive(Clone, Debug, Default)]
pub struct Aggregator {
    pub compress: bool,
    pub parent_policy: ParentPolicy,
    /// Overrides detection by file extension for every input
    pub input_format: Option<FileFormat>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_parent_policy(mut self, parent_policy: ParentPolicy) -> Self {
        self.parent_policy = parent_policy;
        self
    }

    pub fn with_input_format(mut self, input_format: Option<FileFormat>) -> Self {
        self.input_format = input_format;
        self
    }

    /// Load every input in order into one collection and apply the parent
    /// policy.
    pub fn load<P: AsRef<Path>>(&self, inputs: &[P]) -> Result<UswidCollection, UswidError> {
        if inputs.is_empty() {
            return Err(UswidError::EmptyInput);
        }

        let mut collection = UswidCollection::new();
        for input in inputs {
            let mut source = UswidCollection::new();
            source.import_file(input, self.input_format)?;
            if self.parent_policy == ParentPolicy::FirstOfEachSource {
                source.link_first_to_rest();
            }
            collection.append(source);
        }

        match &self.parent_policy {
            ParentPolicy::ParentFile(path) => {
                let mut parent = UswidCollection::new();
                parent.import_file(path, self.input_format)?;
                collection
                    .add_parent(parent)
                    .map_err(|err| err.in_source(path))?;
            }
            ParentPolicy::FirstOfCollection => collection.link_first_to_rest(),
            ParentPolicy::None | ParentPolicy::FirstOfEachSource => {}
        }
        Ok(collection)
    }

    /// Load `inputs` and write them to `output` in the format its extension
    /// names.
    pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        inputs: &[P],
        output: Q,
    ) -> Result<UswidCollection, UswidError> {
        let output = output.as_ref();
        let format = FileFormat::for_output(output)?;
        let collection = self.load(inputs)?;
        self.save(&collection, format, output)?;
        Ok(collection)
    }

    /// Load `inputs` and render them as indented JSON.
    pub fn print<P: AsRef<Path>>(&self, inputs: &[P]) -> Result<String, UswidError> {
        self.load(inputs)?.to_json_pretty()
    }

    /// Add a payload file entry to the single tag read from `input` and
    /// write the result to `output`.
    pub fn add_payload_file<P, F, Q>(
        &self,
        input: P,
        payload: F,
        output: Q,
    ) -> Result<UswidCollection, UswidError>
    where
        P: AsRef<Path>,
        F: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let (input, payload, output) = (input.as_ref(), payload.as_ref(), output.as_ref());
        let format = FileFormat::for_output(output)?;

        let mut collection = UswidCollection::new();
        collection.import_file(input, self.input_format)?;
        let data = fs::read(payload).map_err(|err| UswidError::from(err).in_source(payload))?;
        let fs_name = payload
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| payload.to_string_lossy().into_owned());
        collection
            .add_payload_file(&fs_name, &data)
            .map_err(|err| err.in_source(input))?;

        self.save(&collection, format, output)?;
        Ok(collection)
    }

    fn save(
        &self,
        collection: &UswidCollection,
        format: FileFormat,
        output: &Path,
    ) -> Result<(), UswidError> {
        if self.compress && matches!(format, FileFormat::Json | FileFormat::Xml) {
            warn!(%format, "compression only applies to cbor and uswid output");
        }
        let data = collection.export(format, self.compress)?;
        write_atomic(output, &data)?;
        info!(
            path = %output.display(),
            %format,
            tags = collection.len(),
            bytes = data.len(),
            "wrote tags"
        );
        Ok(())
    }
}

/// Write through a temp file in the target directory so a failed run never
/// leaves a partial output behind.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), UswidError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_tag(dir: &Path, file: &str, name: &str) -> PathBuf {
        let path = dir.join(file);
        let id = SoftwareIdentity::new(generate_tag_id(name), name);
        fs::write(&path, id.to_json().unwrap()).unwrap();
        path
    }

    #[test]
    fn test_convert_json_to_uswid() {
        let temp_dir = TempDir::new().unwrap();
        let a = write_tag(temp_dir.path(), "a.json", "a");
        let b = write_tag(temp_dir.path(), "b.json", "b");
        let out = temp_dir.path().join("out.uswid");

        let aggregator = Aggregator::new();
        let written = aggregator.convert(&[&a, &b], &out).unwrap();
        assert_eq!(written.len(), 2);

        let mut back = UswidCollection::new();
        assert_eq!(back.import_uswid(&fs::read(&out).unwrap()).unwrap(), 0);
        assert_eq!(back, written);
    }

    #[test]
    fn test_convert_rejects_output_before_reading() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.json");
        let err = Aggregator::new()
            .convert(&[&missing], temp_dir.path().join("out.bin"))
            .unwrap_err();
        assert!(matches!(err, UswidError::UnsupportedExtension(_)));
        assert!(!temp_dir.path().join("out.bin").exists());
    }

    #[test]
    fn test_missing_input_names_path() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.json");
        let err = Aggregator::new().load(&[&missing]).unwrap_err();
        assert!(err.to_string().contains("missing.json"));
        assert!(matches!(err.root(), UswidError::Io(_)));
    }

    #[test]
    fn test_parent_file_policy() {
        let temp_dir = TempDir::new().unwrap();
        let a = write_tag(temp_dir.path(), "a.json", "a");
        let b = write_tag(temp_dir.path(), "b.json", "b");
        let parent = write_tag(temp_dir.path(), "parent.json", "parent");

        let collection = Aggregator::new()
            .with_parent_policy(ParentPolicy::ParentFile(parent))
            .load(&[&a, &b])
            .unwrap();
        let ids = collection.identities();
        assert_eq!(ids[2].software_name, "parent");
        assert_eq!(ids[2].links.len(), 2);
        assert!(ids[0].links.is_empty());
    }

    #[test]
    fn test_first_of_each_source_policy() {
        let temp_dir = TempDir::new().unwrap();
        let pair = temp_dir.path().join("pair.json");
        let tags = UswidCollection::from(vec![
            SoftwareIdentity::new(generate_tag_id("x"), "x"),
            SoftwareIdentity::new(generate_tag_id("y"), "y"),
        ]);
        fs::write(&pair, tags.to_json().unwrap()).unwrap();
        let single = write_tag(temp_dir.path(), "z.json", "z");

        let collection = Aggregator::new()
            .with_parent_policy(ParentPolicy::FirstOfEachSource)
            .load(&[&pair, &single])
            .unwrap();
        let ids = collection.identities();
        assert_eq!(ids[0].links, vec![Link::requires(&ids[1].tag_id)]);
        assert!(ids[2].links.is_empty());
    }

    #[test]
    fn test_add_payload_file() {
        let temp_dir = TempDir::new().unwrap();
        let tag = write_tag(temp_dir.path(), "fw.json", "fw");
        let blob = temp_dir.path().join("fw.bin");
        fs::write(&blob, b"firmware").unwrap();
        let out = temp_dir.path().join("fw.cbor");

        Aggregator::new()
            .add_payload_file(&tag, &blob, &out)
            .unwrap();

        let mut back = UswidCollection::new();
        back.import_cbor(&fs::read(&out).unwrap()).unwrap();
        let files = &back.identities()[0].payload.as_ref().unwrap().files;
        assert_eq!(files[0].fs_name, "fw.bin");
        assert_eq!(files[0].size, Some(8));
    }
}
