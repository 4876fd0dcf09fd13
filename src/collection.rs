use std::fs;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::UswidError;
use crate::format::FileFormat;
use crate::header;
use crate::identity::{
    generate_tag_id, Entity, File, HashEntry, Link, Role, SoftwareIdentity, SoftwareMeta, TagId,
    SHA256_ALG_ID, SWID_XML_NAMESPACE, SWID_XML_ROOT,
};
use crate::stream;
use crate::xml;

/// Entity added to tags synthesized from pkg-config files.
pub const AUTO_GENERATED_ENTITY: &str = concat!(env!("CARGO_PKG_NAME"), "-cli (auto-generated)");

/// An ordered collection of CoSWID/SWID tags.
///
/// Insertion order is kept: the first tag is the conventional parent, and a
/// collection holding a single tag exports to JSON as a bare object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UswidCollection {
    identities: Vec<SoftwareIdentity>,
}

impl UswidCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identities(&self) -> &[SoftwareIdentity] {
        &self.identities
    }

    pub fn into_identities(self) -> Vec<SoftwareIdentity> {
        self.identities
    }

    pub fn push(&mut self, identity: SoftwareIdentity) {
        self.identities.push(identity);
    }

    pub fn append(&mut self, other: UswidCollection) {
        self.identities.extend(other.identities);
    }

    /// Read a file and append its tags. `format` overrides detection by
    /// extension.
    pub fn import_file<P: AsRef<Path>>(
        &mut self,
        path: P,
        format: Option<FileFormat>,
    ) -> Result<(), UswidError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|err| UswidError::from(err).in_source(path))?;
        let format = format.unwrap_or_else(|| FileFormat::for_input(path));
        let before = self.len();
        self.import(&data, format, &path.to_string_lossy())
            .map_err(|err| err.in_source(path))?;
        debug!(
            path = %path.display(),
            %format,
            count = self.len() - before,
            "imported tags"
        );
        Ok(())
    }

    /// Append the tags held in `data`. `source_name` seeds the tag id of
    /// tags synthesized from pkg-config data.
    pub fn import(
        &mut self,
        data: &[u8],
        format: FileFormat,
        source_name: &str,
    ) -> Result<(), UswidError> {
        match format {
            FileFormat::Json => self.import_json(data),
            FileFormat::Xml => self.import_xml(data),
            FileFormat::Cbor => self.import_cbor(data),
            FileFormat::Uswid => self.import_uswid(data).map(|_| ()),
            FileFormat::PkgConfig => {
                self.import_pc(&String::from_utf8_lossy(data), source_name);
                Ok(())
            }
        }
    }

    /// Append from a JSON object or array of objects.
    pub fn import_json(&mut self, data: &[u8]) -> Result<(), UswidError> {
        let data = data.trim_ascii();
        match data {
            [] => Err(UswidError::EmptyInput),
            [b'[', .., b']'] => {
                let identities: Vec<SoftwareIdentity> = serde_json::from_slice(data)?;
                self.identities.extend(identities);
                Ok(())
            }
            _ => {
                self.identities.push(SoftwareIdentity::from_json(data)?);
                Ok(())
            }
        }
    }

    /// Append every `SoftwareIdentity` element of an XML buffer. Elements
    /// may be siblings without an enclosing root.
    pub fn import_xml(&mut self, data: &[u8]) -> Result<(), UswidError> {
        if data.is_empty() {
            return Err(UswidError::EmptyInput);
        }
        let mut offset = 0;
        while offset < data.len() {
            match xml::read_identity(&data[offset..])? {
                Some((identity, consumed)) => {
                    self.identities.push(identity);
                    offset += consumed;
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Append from a bare CBOR record stream.
    pub fn import_cbor(&mut self, data: &[u8]) -> Result<(), UswidError> {
        if data.is_empty() {
            return Err(UswidError::EmptyInput);
        }
        self.identities.extend(stream::decode_raw(data)?);
        Ok(())
    }

    /// Append from the first uSWID container found in `blob`, returning the
    /// offset the container starts at.
    ///
    /// A record that fails to decode is reported at its offset in `blob`
    /// for a plain payload, and at its offset in the inflated stream for a
    /// compressed one.
    pub fn import_uswid(&mut self, blob: &[u8]) -> Result<usize, UswidError> {
        let container = header::locate(blob)?;
        let compressed = container.header.is_compressed();
        let records = stream::decode(
            container.payload,
            container.header.payload_len as usize,
            compressed,
        )
        .map_err(|err| match err {
            UswidError::RecordDecode { offset, source } if !compressed => {
                UswidError::RecordDecode {
                    offset: container.offset + header::HEADER_LEN + offset,
                    source,
                }
            }
            other => other,
        })?;
        self.identities.extend(records);
        Ok(container.offset)
    }

    /// Synthesize a tag from a pkg-config style file.
    ///
    /// Only `Name`, `Description` and `Version` are used. The tag id is
    /// derived from `source_name`, so regenerating from the same file gives
    /// the same id.
    pub fn import_pc(&mut self, text: &str, source_name: &str) {
        let text = text.replace("\r\n", "\n");
        let mut identity = SoftwareIdentity::new(generate_tag_id(source_name), "");
        let mut summary = None;
        for line in text.split('\n') {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "Name" => identity.software_name = value,
                "Description" => summary = Some(value),
                "Version" => identity.software_version = Some(value),
                _ => {}
            }
        }
        if let Some(summary) = summary {
            identity.add_software_meta(SoftwareMeta::with_summary(summary));
        }
        if identity.entities.is_empty() {
            identity.add_entity(Entity::new(AUTO_GENERATED_ENTITY, Role::TagCreator));
        }
        self.identities.push(identity);
    }

    /// Make `parent` require every tag currently in the collection, then
    /// append it after them.
    pub fn add_parent(&mut self, parent: UswidCollection) -> Result<(), UswidError> {
        let mut parents = parent.identities;
        if parents.len() != 1 {
            return Err(UswidError::MultipleIdentitiesInParent(parents.len()));
        }
        let mut parent = parents.remove(0);
        for child in &self.identities {
            parent.add_link(Link::requires(&child.tag_id));
        }
        self.identities.push(parent);
        Ok(())
    }

    /// Make the first tag require every other tag.
    pub fn link_first_to_rest(&mut self) {
        if let Some((first, rest)) = self.identities.split_first_mut() {
            for child in rest.iter() {
                first.add_link(Link::requires(&child.tag_id));
            }
        }
    }

    /// Record a payload file (name, size and SHA-256) in the only tag of the
    /// collection.
    pub fn add_payload_file(&mut self, fs_name: &str, data: &[u8]) -> Result<(), UswidError> {
        let [identity] = self.identities.as_mut_slice() else {
            return Err(UswidError::ExpectedSingleIdentity(self.identities.len()));
        };
        let mut file = File::new(fs_name);
        file.size = Some(data.len() as u64);
        file.hash = Some(HashEntry {
            alg_id: SHA256_ALG_ID,
            value: Sha256::digest(data).to_vec(),
        });
        identity.add_file(file);
        Ok(())
    }

    pub fn tag_ids(&self) -> impl Iterator<Item = &TagId> {
        self.identities.iter().map(|identity| &identity.tag_id)
    }

    /// A single tag is written as a bare object, anything else as an array.
    pub fn to_json(&self) -> Result<Vec<u8>, UswidError> {
        if let [single] = self.identities.as_slice() {
            return single.to_json();
        }
        let mut buf = vec![b'['];
        for (i, identity) in self.identities.iter().enumerate() {
            if i > 0 {
                buf.push(b',');
            }
            buf.extend_from_slice(&identity.to_json()?);
        }
        buf.push(b']');
        Ok(buf)
    }

    /// [`to_json`](Self::to_json) indented by four spaces.
    pub fn to_json_pretty(&self) -> Result<String, UswidError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        match self.identities.as_slice() {
            [single] => single.serialize(&mut serializer)?,
            many => many.serialize(&mut serializer)?,
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// SWID XML elements written back to back, with no enclosing root.
    pub fn to_xml(&self) -> Result<Vec<u8>, UswidError> {
        let mut buf = Vec::new();
        for identity in &self.identities {
            let mut identity = identity.clone();
            identity.set_xml_root(SWID_XML_ROOT, Some(SWID_XML_NAMESPACE));
            buf.extend_from_slice(&xml::write_identity(&identity)?);
        }
        Ok(buf)
    }

    pub fn to_cbor(&self, compress: bool) -> Result<Vec<u8>, UswidError> {
        stream::encode(&self.identities, compress)
    }

    pub fn to_uswid(&self, compress: bool) -> Result<Vec<u8>, UswidError> {
        header::encode(&stream::encode(&self.identities, compress)?, compress)
    }

    /// Serialize to `format`. `compress` only affects the binary formats.
    pub fn export(&self, format: FileFormat, compress: bool) -> Result<Vec<u8>, UswidError> {
        match format {
            FileFormat::Json => self.to_json(),
            FileFormat::Xml => self.to_xml(),
            FileFormat::Cbor => self.to_cbor(compress),
            FileFormat::Uswid => self.to_uswid(compress),
            FileFormat::PkgConfig => Err(UswidError::UnsupportedExtension(
                FileFormat::PkgConfig.to_string(),
            )),
        }
    }
}

impl From<Vec<SoftwareIdentity>> for UswidCollection {
    fn from(identities: Vec<SoftwareIdentity>) -> Self {
        Self { identities }
    }
}

impl FromIterator<SoftwareIdentity> for UswidCollection {
    fn from_iter<I: IntoIterator<Item = SoftwareIdentity>>(iter: I) -> Self {
        Self {
            identities: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for UswidCollection {
    type Item = SoftwareIdentity;
    type IntoIter = std::vec::IntoIter<SoftwareIdentity>;

    fn into_iter(self) -> Self::IntoIter {
        self.identities.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Rel;

    fn tag(name: &str) -> SoftwareIdentity {
        let mut id = SoftwareIdentity::new(generate_tag_id(name), name);
        id.software_version = Some("1.0".to_string());
        id
    }

    fn abc() -> UswidCollection {
        UswidCollection::from(vec![tag("a"), tag("b"), tag("c")])
    }

    #[test]
    fn test_import_json_single_and_array() {
        let mut collection = UswidCollection::new();
        collection
            .import_json(br#"  {"tag-id": "one", "software-name": "One"}  "#)
            .unwrap();
        collection
            .import_json(
                br#"[{"tag-id": "two", "software-name": "Two"},
                     {"tag-id": "three", "software-name": "Three"}]"#,
            )
            .unwrap();
        let names: Vec<_> = collection
            .identities()
            .iter()
            .map(|id| id.software_name.as_str())
            .collect();
        assert_eq!(names, ["One", "Two", "Three"]);
    }

    #[test]
    fn test_import_empty_input() {
        let mut collection = UswidCollection::new();
        assert!(matches!(
            collection.import_json(b" \n"),
            Err(UswidError::EmptyInput)
        ));
        assert!(matches!(
            collection.import_xml(b""),
            Err(UswidError::EmptyInput)
        ));
        assert!(matches!(
            collection.import_cbor(b""),
            Err(UswidError::EmptyInput)
        ));
    }

    #[test]
    fn test_json_export_single_vs_many() {
        let single = UswidCollection::from(vec![tag("a")]);
        let json = single.to_json().unwrap();
        assert_eq!(json, tag("a").to_json().unwrap());
        assert!(serde_json::from_slice::<serde_json::Value>(&json)
            .unwrap()
            .is_object());

        let many = abc().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&many).unwrap();
        let array = value.as_array().unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(array[2]["software-name"], "c");
        assert!(!many.ends_with(b",]"));
    }

    #[test]
    fn test_empty_collection_exports_empty_array() {
        let empty = UswidCollection::new();
        assert_eq!(empty.to_json().unwrap(), b"[]");
        assert_eq!(empty.to_json_pretty().unwrap(), "[]");
    }

    #[test]
    fn test_json_pretty_uses_four_spaces() {
        let pretty = UswidCollection::from(vec![tag("a")]).to_json_pretty().unwrap();
        assert!(pretty.starts_with("{\n    \"tag-id\""));
    }

    #[test]
    fn test_xml_export_reimports() {
        let xml = abc().to_xml().unwrap();
        assert_eq!(
            String::from_utf8_lossy(&xml)
                .matches("<SoftwareIdentity xmlns=")
                .count(),
            3
        );
        let mut back = UswidCollection::new();
        back.import_xml(&xml).unwrap();
        assert_eq!(back, abc());
    }

    #[test]
    fn test_uswid_export_layout() {
        let collection = UswidCollection::from(vec![tag("a"), tag("b")]);
        let a = crate::cbor::encode_identity(&collection.identities()[0]).unwrap();
        let b = crate::cbor::encode_identity(&collection.identities()[1]).unwrap();

        let out = collection.to_uswid(false).unwrap();
        assert_eq!(out.len(), 24 + a.len() + b.len());
        assert_eq!(out[16], 0x02);
        assert_eq!(
            u32::from_le_bytes(out[19..23].try_into().unwrap()) as usize,
            a.len() + b.len()
        );
    }

    #[test]
    fn test_uswid_roundtrip_reports_offset() {
        for compress in [false, true] {
            let mut blob = vec![0x5au8; 33];
            blob.extend(abc().to_uswid(compress).unwrap());
            blob.extend([0xffu8; 17]);

            let mut back = UswidCollection::new();
            assert_eq!(back.import_uswid(&blob).unwrap(), 33);
            assert_eq!(back, abc());
        }
    }

    #[test]
    fn test_record_error_offset() {
        let mut stream = abc().to_cbor(false).unwrap();
        // Not a map: the first record cannot decode
        stream[0] = 0x7f;

        let mut plain = vec![0u8; 10];
        plain.extend(header::encode(&stream, false).unwrap());
        match UswidCollection::new().import_uswid(&plain) {
            Err(UswidError::RecordDecode { offset, .. }) => assert_eq!(offset, 10 + 24),
            other => panic!("unexpected result: {:?}", other),
        }

        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        std::io::Write::write_all(&mut encoder, &stream).unwrap();
        let mut packed = vec![0u8; 10];
        packed.extend(header::encode(&encoder.finish().unwrap(), true).unwrap());
        match UswidCollection::new().import_uswid(&packed) {
            Err(UswidError::RecordDecode { offset, .. }) => assert_eq!(offset, 0),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_link_first_to_rest() {
        let mut collection = abc();
        collection.link_first_to_rest();
        let ids = collection.identities();
        assert_eq!(
            ids[0].links,
            vec![
                Link::new(ids[1].tag_id.uri(), Rel::Requires),
                Link::new(ids[2].tag_id.uri(), Rel::Requires),
            ]
        );
        assert!(ids[1].links.is_empty());
        assert!(ids[2].links.is_empty());
    }

    #[test]
    fn test_add_parent_appends_at_end() {
        let mut collection = UswidCollection::from(vec![tag("b"), tag("c")]);
        collection
            .add_parent(UswidCollection::from(vec![tag("a")]))
            .unwrap();
        let ids = collection.identities();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2].software_name, "a");
        assert_eq!(ids[2].links.len(), 2);
        assert_eq!(ids[2].links[0].href, ids[0].tag_id.uri());
        assert_eq!(ids[2].links[1].href, ids[1].tag_id.uri());
    }

    #[test]
    fn test_add_parent_requires_single_tag() {
        let mut collection = UswidCollection::from(vec![tag("c")]);
        let err = collection
            .add_parent(UswidCollection::from(vec![tag("a"), tag("b")]))
            .unwrap_err();
        assert!(matches!(err, UswidError::MultipleIdentitiesInParent(2)));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_import_pc() {
        let pc = "prefix=/usr\r\nName: zlib\r\nDescription: zlib compression library\r\nVersion: 1.3.1\r\nLibs: -lz\r\n";
        let mut first = UswidCollection::new();
        first.import_pc(pc, "zlib.pc");
        let mut second = UswidCollection::new();
        second.import_pc(pc, "zlib.pc");

        let id = &first.identities()[0];
        assert_eq!(id.software_name, "zlib");
        assert_eq!(id.software_version.as_deref(), Some("1.3.1"));
        assert_eq!(
            id.software_meta[0].summary.as_deref(),
            Some("zlib compression library")
        );
        assert_eq!(id.entities, vec![Entity::new(AUTO_GENERATED_ENTITY, Role::TagCreator)]);
        assert_eq!(id.tag_id, TagId::Uuid(generate_tag_id("zlib.pc")));
        assert_eq!(second.identities()[0].tag_id, id.tag_id);
    }

    #[test]
    fn test_add_payload_file() {
        let mut collection = UswidCollection::from(vec![tag("fw")]);
        collection.add_payload_file("fw.bin", b"abc").unwrap();
        let file = &collection.identities()[0].payload.as_ref().unwrap().files[0];
        assert_eq!(file.fs_name, "fw.bin");
        assert_eq!(file.size, Some(3));
        assert_eq!(
            hex::encode(&file.hash.as_ref().unwrap().value),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let mut two = abc();
        assert!(matches!(
            two.add_payload_file("fw.bin", b""),
            Err(UswidError::ExpectedSingleIdentity(3))
        ));
    }

    #[test]
    fn test_export_pc_is_unsupported() {
        assert!(matches!(
            abc().export(FileFormat::PkgConfig, false),
            Err(UswidError::UnsupportedExtension(_))
        ));
    }
}
