use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::UswidError;

/// ISO 19770-2 schema namespace used as the XML root namespace.
pub const SWID_XML_NAMESPACE: &str = "http://standards.iso.org/iso/19770/-2/2015/schema.xsd";

/// Root element name of a SWID tag.
pub const SWID_XML_ROOT: &str = "SoftwareIdentity";

/// CoSWID hash algorithm id for SHA-256 (IANA named information registry).
pub const SHA256_ALG_ID: u32 = 1;

/// Generate a deterministic tag id: a type-5 (SHA-1) RFC 4122 UUID of
/// `name` in the DNS namespace.
pub fn generate_tag_id(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
}

/// Serialize/deserialize a type through its string form.
macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Tag identifier: either a 16 byte UUID or free text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagId {
    Uuid(Uuid),
    Text(String),
}

impl TagId {
    /// The tag id as a `swid:` URI, usable as a link target.
    pub fn uri(&self) -> String {
        format!("swid:{}", self)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TagId::Text(s) if s.is_empty())
    }
}

impl Default for TagId {
    fn default() -> Self {
        TagId::Text(String::new())
    }
}

impl From<Uuid> for TagId {
    fn from(uuid: Uuid) -> Self {
        TagId::Uuid(uuid)
    }
}

impl FromStr for TagId {
    type Err = std::convert::Infallible;

    // Only the canonical hyphenated form is a UUID; anything else stays text so
    // that it prints back exactly as it was read.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Uuid::parse_str(s) {
            Ok(uuid) if uuid.hyphenated().to_string() == s => Ok(TagId::Uuid(uuid)),
            _ => Ok(TagId::Text(s.to_string())),
        }
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagId::Uuid(uuid) => write!(f, "{}", uuid.hyphenated()),
            TagId::Text(text) => f.write_str(text),
        }
    }
}

string_serde!(TagId);

/// Link relation types (CoSWID `rel` registry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rel {
    Ancestor,
    Component,
    Feature,
    InstallationMedia,
    PackageInstaller,
    Parent,
    Patches,
    Requires,
    SeeAlso,
    Supersedes,
    Supplemental,
}

impl Rel {
    const ALL: [Rel; 11] = [
        Rel::Ancestor,
        Rel::Component,
        Rel::Feature,
        Rel::InstallationMedia,
        Rel::PackageInstaller,
        Rel::Parent,
        Rel::Patches,
        Rel::Requires,
        Rel::SeeAlso,
        Rel::Supersedes,
        Rel::Supplemental,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rel::Ancestor => "ancestor",
            Rel::Component => "component",
            Rel::Feature => "feature",
            Rel::InstallationMedia => "installationmedia",
            Rel::PackageInstaller => "packageinstaller",
            Rel::Parent => "parent",
            Rel::Patches => "patches",
            Rel::Requires => "requires",
            Rel::SeeAlso => "see-also",
            Rel::Supersedes => "supersedes",
            Rel::Supplemental => "supplemental",
        }
    }

    pub fn code(&self) -> u64 {
        *self as u64 + 1
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|rel| rel.code() == code)
    }
}

impl FromStr for Rel {
    type Err = UswidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|rel| rel.as_str() == s)
            .ok_or_else(|| UswidError::invalid("link rel", s))
    }
}

impl fmt::Display for Rel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

string_serde!(Rel);

/// Entity roles (CoSWID `role` registry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    TagCreator,
    SoftwareCreator,
    Aggregator,
    Distributor,
    Licensor,
    Maintainer,
}

impl Role {
    const ALL: [Role; 6] = [
        Role::TagCreator,
        Role::SoftwareCreator,
        Role::Aggregator,
        Role::Distributor,
        Role::Licensor,
        Role::Maintainer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::TagCreator => "tag-creator",
            Role::SoftwareCreator => "software-creator",
            Role::Aggregator => "aggregator",
            Role::Distributor => "distributor",
            Role::Licensor => "licensor",
            Role::Maintainer => "maintainer",
        }
    }

    /// Spelling used by SWID XML tags.
    pub fn xml_name(&self) -> &'static str {
        match self {
            Role::TagCreator => "tagCreator",
            Role::SoftwareCreator => "softwareCreator",
            other => other.as_str(),
        }
    }

    pub fn code(&self) -> u64 {
        *self as u64 + 1
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|role| role.code() == code)
    }
}

impl FromStr for Role {
    type Err = UswidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s || role.xml_name() == s)
            .ok_or_else(|| UswidError::invalid("entity role", s))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

string_serde!(Role);

/// Version scheme of `software-version`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionScheme {
    MultipartNumeric,
    MultipartNumericSuffix,
    AlphaNumeric,
    Decimal,
    SemVer,
    Other(String),
}

impl VersionScheme {
    pub fn as_str(&self) -> &str {
        match self {
            VersionScheme::MultipartNumeric => "multipartnumeric",
            VersionScheme::MultipartNumericSuffix => "multipartnumeric+suffix",
            VersionScheme::AlphaNumeric => "alphanumeric",
            VersionScheme::Decimal => "decimal",
            VersionScheme::SemVer => "semver",
            VersionScheme::Other(name) => name,
        }
    }

    pub fn code(&self) -> Option<u64> {
        match self {
            VersionScheme::MultipartNumeric => Some(1),
            VersionScheme::MultipartNumericSuffix => Some(2),
            VersionScheme::AlphaNumeric => Some(3),
            VersionScheme::Decimal => Some(4),
            VersionScheme::SemVer => Some(16384),
            VersionScheme::Other(_) => None,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(VersionScheme::MultipartNumeric),
            2 => Some(VersionScheme::MultipartNumericSuffix),
            3 => Some(VersionScheme::AlphaNumeric),
            4 => Some(VersionScheme::Decimal),
            16384 => Some(VersionScheme::SemVer),
            _ => None,
        }
    }
}

impl FromStr for VersionScheme {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "multipartnumeric" => VersionScheme::MultipartNumeric,
            "multipartnumeric+suffix" => VersionScheme::MultipartNumericSuffix,
            "alphanumeric" => VersionScheme::AlphaNumeric,
            "decimal" => VersionScheme::Decimal,
            "semver" => VersionScheme::SemVer,
            other => VersionScheme::Other(other.to_string()),
        })
    }
}

impl fmt::Display for VersionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

string_serde!(VersionScheme);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// CoSWID "one-or-more" fields: accept a bare value or an array.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Entity {
    pub entity_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reg_id: Option<String>,
    #[serde(rename = "role", default, deserialize_with = "one_or_many")]
    pub roles: Vec<Role>,
}

impl Entity {
    pub fn new(entity_name: impl Into<String>, role: Role) -> Self {
        Self {
            entity_name: entity_name.into(),
            reg_id: None,
            roles: vec![role],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub rel: Rel,
}

impl Link {
    pub fn new(href: impl Into<String>, rel: Rel) -> Self {
        Self {
            href: href.into(),
            rel,
        }
    }

    /// A `requires` link to another tag.
    pub fn requires(target: &TagId) -> Self {
        Self::new(target.uri(), Rel::Requires)
    }
}

/// CoSWID software-meta text fields: (map key, XML attribute name).
pub(crate) const SOFTWARE_META_TEXT_FIELDS: [(u64, &str); 14] = [
    (43, "activationStatus"),
    (44, "channelType"),
    (45, "colloquialVersion"),
    (46, "description"),
    (47, "edition"),
    (49, "entitlementKey"),
    (50, "generator"),
    (51, "persistentId"),
    (52, "product"),
    (53, "productFamily"),
    (54, "revision"),
    (55, "summary"),
    (56, "unspscCode"),
    (57, "unspscVersion"),
];

pub(crate) const ENTITLEMENT_DATA_REQUIRED: u64 = 48;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SoftwareMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colloquial_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entitlement_data_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entitlement_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unspsc_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unspsc_version: Option<String>,
}

impl SoftwareMeta {
    pub fn with_summary(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            ..Self::default()
        }
    }

    pub(crate) fn text_field(&self, key: u64) -> Option<&String> {
        match key {
            43 => self.activation_status.as_ref(),
            44 => self.channel_type.as_ref(),
            45 => self.colloquial_version.as_ref(),
            46 => self.description.as_ref(),
            47 => self.edition.as_ref(),
            49 => self.entitlement_key.as_ref(),
            50 => self.generator.as_ref(),
            51 => self.persistent_id.as_ref(),
            52 => self.product.as_ref(),
            53 => self.product_family.as_ref(),
            54 => self.revision.as_ref(),
            55 => self.summary.as_ref(),
            56 => self.unspsc_code.as_ref(),
            57 => self.unspsc_version.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn text_field_mut(&mut self, key: u64) -> Option<&mut Option<String>> {
        match key {
            43 => Some(&mut self.activation_status),
            44 => Some(&mut self.channel_type),
            45 => Some(&mut self.colloquial_version),
            46 => Some(&mut self.description),
            47 => Some(&mut self.edition),
            49 => Some(&mut self.entitlement_key),
            50 => Some(&mut self.generator),
            51 => Some(&mut self.persistent_id),
            52 => Some(&mut self.product),
            53 => Some(&mut self.product_family),
            54 => Some(&mut self.revision),
            55 => Some(&mut self.summary),
            56 => Some(&mut self.unspsc_code),
            57 => Some(&mut self.unspsc_version),
            _ => None,
        }
    }

    /// Number of populated fields.
    pub(crate) fn field_count(&self) -> usize {
        SOFTWARE_META_TEXT_FIELDS
            .iter()
            .filter(|(key, _)| self.text_field(*key).is_some())
            .count()
            + usize::from(self.entitlement_data_required.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HashEntry {
    pub alg_id: u32,
    #[serde(rename = "hash-value", with = "hex::serde")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct File {
    pub fs_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<HashEntry>,
}

impl File {
    pub fn new(fs_name: impl Into<String>) -> Self {
        Self {
            fs_name: fs_name.into(),
            size: None,
            file_version: None,
            location: None,
            hash: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(
        rename = "file",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub files: Vec<File>,
}

/// Root element of the markup form. Readers never fill this in; it has to be
/// set explicitly before a tag is written as XML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlRoot {
    pub local: String,
    pub namespace: Option<String>,
}

/// A single CoSWID/SWID tag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SoftwareIdentity {
    pub tag_id: TagId,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub tag_version: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub corpus: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub patch: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub supplemental: bool,
    pub software_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_scheme: Option<VersionScheme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(
        rename = "entity",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub entities: Vec<Entity>,
    #[serde(
        rename = "link",
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub links: Vec<Link>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "one_or_many"
    )]
    pub software_meta: Vec<SoftwareMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(skip)]
    pub xml_root: XmlRoot,
}

impl SoftwareIdentity {
    pub fn new(tag_id: impl Into<TagId>, software_name: impl Into<String>) -> Self {
        Self {
            tag_id: tag_id.into(),
            software_name: software_name.into(),
            ..Self::default()
        }
    }

    pub fn add_link(&mut self, link: Link) {
        self.links.push(link);
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.push(entity);
    }

    pub fn add_software_meta(&mut self, meta: SoftwareMeta) {
        self.software_meta.push(meta);
    }

    pub fn add_file(&mut self, file: File) {
        self.payload.get_or_insert_with(Payload::default).files.push(file);
    }

    pub fn set_xml_root(&mut self, local: impl Into<String>, namespace: Option<&str>) {
        self.xml_root = XmlRoot {
            local: local.into(),
            namespace: namespace.map(str::to_string),
        };
    }

    /// Single-object JSON form.
    pub fn to_json(&self) -> Result<Vec<u8>, UswidError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, UswidError> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_tag_id_is_deterministic() {
        let id = generate_tag_id("python.org");
        assert_eq!(id.to_string(), "886313e1-3b8a-5372-9b90-0c9aee199e5d");
        assert_eq!(generate_tag_id("python.org"), id);
        assert_ne!(generate_tag_id("python.org."), id);
    }

    #[test]
    fn test_tag_id_parsing() {
        let id: TagId = "886313e1-3b8a-5372-9b90-0c9aee199e5d".parse().unwrap();
        assert!(matches!(id, TagId::Uuid(_)));
        assert_eq!(id.uri(), "swid:886313e1-3b8a-5372-9b90-0c9aee199e5d");

        // Non-canonical spellings stay text so they print back unchanged
        let id: TagId = "886313E1-3B8A-5372-9B90-0C9AEE199E5D".parse().unwrap();
        assert!(matches!(id, TagId::Text(_)));
        assert_eq!(id.to_string(), "886313E1-3B8A-5372-9B90-0C9AEE199E5D");

        let id: TagId = "acme.com+firmware-1.0".parse().unwrap();
        assert_eq!(id, TagId::Text("acme.com+firmware-1.0".to_string()));
    }

    #[test]
    fn test_rel_and_role_codes() {
        assert_eq!(Rel::Requires.code(), 8);
        assert_eq!(Rel::from_code(8), Some(Rel::Requires));
        assert_eq!(Rel::from_code(0), None);
        assert_eq!("see-also".parse::<Rel>().unwrap(), Rel::SeeAlso);
        assert!("depends".parse::<Rel>().is_err());

        assert_eq!(Role::TagCreator.code(), 1);
        assert_eq!(Role::from_code(6), Some(Role::Maintainer));
        assert_eq!("tagCreator".parse::<Role>().unwrap(), Role::TagCreator);
        assert_eq!("tag-creator".parse::<Role>().unwrap(), Role::TagCreator);
    }

    #[test]
    fn test_json_accepts_single_or_array_fields() {
        let json = br#"{
            "tag-id": "acme-fw",
            "software-name": "ACME Firmware",
            "entity": {"entity-name": "ACME", "role": "tag-creator"},
            "link": [{"href": "swid:other", "rel": "requires"}],
            "software-meta": {"summary": "boot firmware"}
        }"#;
        let id = SoftwareIdentity::from_json(json).unwrap();
        assert_eq!(id.tag_id, TagId::Text("acme-fw".to_string()));
        assert_eq!(id.entities, vec![Entity::new("ACME", Role::TagCreator)]);
        assert_eq!(id.links, vec![Link::new("swid:other", Rel::Requires)]);
        assert_eq!(id.software_meta[0].summary.as_deref(), Some("boot firmware"));

        let back = SoftwareIdentity::from_json(&id.to_json().unwrap()).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_json_hash_is_hex() {
        let mut id = SoftwareIdentity::new(generate_tag_id("fw"), "fw");
        let mut file = File::new("fw.bin");
        file.hash = Some(HashEntry {
            alg_id: SHA256_ALG_ID,
            value: vec![0xde, 0xad, 0xbe, 0xef],
        });
        id.add_file(file);

        let json = String::from_utf8(id.to_json().unwrap()).unwrap();
        assert!(json.contains(r#""hash-value":"deadbeef""#));
        assert_eq!(SoftwareIdentity::from_json(json.as_bytes()).unwrap(), id);
    }

    #[test]
    fn test_add_link_appends() {
        let mut id = SoftwareIdentity::new(generate_tag_id("a"), "a");
        id.add_link(Link::new("https://example.com", Rel::SeeAlso));
        id.add_link(Link::requires(&TagId::Text("b".to_string())));
        assert_eq!(id.links.len(), 2);
        assert_eq!(id.links[0].rel, Rel::SeeAlso);
        assert_eq!(id.links[1].href, "swid:b");
    }
}
