//! Single-tag SWID (ISO/IEC 19770-2) XML codec.

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use crate::error::UswidError;
use crate::identity::{
    Entity, File, HashEntry, Link, Rel, Role, SoftwareIdentity, SoftwareMeta,
    SOFTWARE_META_TEXT_FIELDS, SWID_XML_ROOT,
};

/// File hash algorithms with an XML spelling: (IANA named information id,
/// conventional prefix, namespace the prefix is bound to).
const HASH_ALGORITHMS: [(u32, &str, &str); 3] = [
    (1, "SHA256", "http://www.w3.org/2001/04/xmlenc#sha256"),
    (7, "SHA384", "http://www.w3.org/2001/04/xmldsig-more#sha384"),
    (8, "SHA512", "http://www.w3.org/2001/04/xmlenc#sha512"),
];

/// `xmlns:<prefix>` declarations of one element.
type NsBindings = Vec<(String, String)>;

/// Write one tag as a `SoftwareIdentity` element.
///
/// The root element name (and namespace, if any) must have been set with
/// [`SoftwareIdentity::set_xml_root`].
pub fn write_identity(id: &SoftwareIdentity) -> Result<Vec<u8>, UswidError> {
    if id.xml_root.local.is_empty() {
        return Err(UswidError::Xml(format!(
            "root element name not set for tag {}",
            id.tag_id
        )));
    }

    let mut root = BytesStart::new(id.xml_root.local.as_str());
    if let Some(namespace) = &id.xml_root.namespace {
        root.push_attribute(("xmlns", namespace.as_str()));
    }
    root.push_attribute(("tagId", id.tag_id.to_string().as_str()));
    root.push_attribute(("name", id.software_name.as_str()));
    if let Some(version) = &id.software_version {
        root.push_attribute(("version", version.as_str()));
    }
    if let Some(scheme) = &id.version_scheme {
        root.push_attribute(("versionScheme", scheme.as_str()));
    }
    if id.tag_version != 0 {
        root.push_attribute(("tagVersion", id.tag_version.to_string().as_str()));
    }
    for (flag, name) in [
        (id.corpus, "corpus"),
        (id.patch, "patch"),
        (id.supplemental, "supplemental"),
    ] {
        if flag {
            root.push_attribute((name, "true"));
        }
    }
    if let Some(lang) = &id.lang {
        root.push_attribute(("xml:lang", lang.as_str()));
    }

    let mut writer = Writer::new(Vec::new());
    let has_children = !id.entities.is_empty()
        || !id.links.is_empty()
        || !id.software_meta.is_empty()
        || id.payload.is_some();
    if !has_children {
        writer
            .write_event(Event::Empty(root))
            .map_err(UswidError::xml)?;
        return Ok(writer.into_inner());
    }

    writer
        .write_event(Event::Start(root))
        .map_err(UswidError::xml)?;
    for entity in &id.entities {
        write_empty(&mut writer, entity_element(entity))?;
    }
    for link in &id.links {
        let mut elem = BytesStart::new("Link");
        elem.push_attribute(("href", link.href.as_str()));
        elem.push_attribute(("rel", link.rel.as_str()));
        write_empty(&mut writer, elem)?;
    }
    for meta in &id.software_meta {
        write_empty(&mut writer, meta_element(meta))?;
    }
    if let Some(payload) = &id.payload {
        if payload.files.is_empty() {
            write_empty(&mut writer, BytesStart::new("Payload"))?;
        } else {
            writer
                .write_event(Event::Start(BytesStart::new("Payload")))
                .map_err(UswidError::xml)?;
            for file in &payload.files {
                write_empty(&mut writer, file_element(file)?)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("Payload")))
                .map_err(UswidError::xml)?;
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(id.xml_root.local.as_str())))
        .map_err(UswidError::xml)?;
    Ok(writer.into_inner())
}

fn write_empty(writer: &mut Writer<Vec<u8>>, elem: BytesStart<'_>) -> Result<(), UswidError> {
    writer
        .write_event(Event::Empty(elem))
        .map_err(UswidError::xml)?;
    Ok(())
}

fn entity_element(entity: &Entity) -> BytesStart<'static> {
    let mut elem = BytesStart::new("Entity");
    elem.push_attribute(("name", entity.entity_name.as_str()));
    if let Some(reg_id) = &entity.reg_id {
        elem.push_attribute(("regid", reg_id.as_str()));
    }
    if !entity.roles.is_empty() {
        let roles: Vec<&str> = entity.roles.iter().map(|role| role.xml_name()).collect();
        elem.push_attribute(("role", roles.join(" ").as_str()));
    }
    elem
}

fn meta_element(meta: &SoftwareMeta) -> BytesStart<'static> {
    let mut elem = BytesStart::new("Meta");
    for (key, name) in SOFTWARE_META_TEXT_FIELDS {
        if let Some(value) = meta.text_field(key) {
            elem.push_attribute((name, value.as_str()));
        }
    }
    if let Some(required) = meta.entitlement_data_required {
        elem.push_attribute((
            "entitlementDataRequired",
            if required { "true" } else { "false" },
        ));
    }
    elem
}

fn file_element(file: &File) -> Result<BytesStart<'static>, UswidError> {
    let mut elem = BytesStart::new("File");
    elem.push_attribute(("name", file.fs_name.as_str()));
    if let Some(size) = file.size {
        elem.push_attribute(("size", size.to_string().as_str()));
    }
    if let Some(version) = &file.file_version {
        elem.push_attribute(("version", version.as_str()));
    }
    if let Some(location) = &file.location {
        elem.push_attribute(("location", location.as_str()));
    }
    if let Some(hash) = &file.hash {
        let (_, prefix, namespace) = HASH_ALGORITHMS
            .iter()
            .find(|(alg_id, _, _)| *alg_id == hash.alg_id)
            .ok_or_else(|| UswidError::invalid("hash algorithm", hash.alg_id.to_string()))?;
        elem.push_attribute((format!("xmlns:{}", prefix).as_str(), *namespace));
        elem.push_attribute((
            format!("{}:hash", prefix).as_str(),
            hex::encode(&hash.value).as_str(),
        ));
    }
    Ok(elem)
}

/// Read the first `SoftwareIdentity` element of `data`.
///
/// Returns the tag and the number of bytes consumed, or `None` when only
/// whitespace, comments or declarations remain.
pub fn read_identity(data: &[u8]) -> Result<Option<(SoftwareIdentity, usize)>, UswidError> {
    let mut reader = Reader::from_reader(data);
    let mut id: Option<SoftwareIdentity> = None;
    let mut depth = 0usize;
    let mut in_payload = false;
    // One entry per open element below the document level
    let mut scopes: Vec<NsBindings> = Vec::new();

    loop {
        let event = reader.read_event().map_err(UswidError::xml)?;
        match &event {
            Event::Start(elem) | Event::Empty(elem) => {
                let is_empty = matches!(event, Event::Empty(_));
                let local = elem.local_name();
                let attrs = attributes(elem)?;

                let Some(current) = id.as_mut() else {
                    if local.as_ref() != SWID_XML_ROOT.as_bytes() {
                        return Err(UswidError::Xml(format!(
                            "expected {} element, found {}",
                            SWID_XML_ROOT,
                            String::from_utf8_lossy(local.as_ref())
                        )));
                    }
                    let root = root_from_attributes(&attrs)?;
                    if is_empty {
                        return Ok(Some((root, reader.buffer_position() as usize)));
                    }
                    id = Some(root);
                    depth = 1;
                    scopes.push(ns_bindings(&attrs));
                    continue;
                };

                match local.as_ref() {
                    b"Entity" => current.add_entity(entity_from_attributes(&attrs)?),
                    b"Link" => current.add_link(link_from_attributes(&attrs)?),
                    b"Meta" => current.add_software_meta(meta_from_attributes(&attrs)?),
                    b"Payload" => {
                        current.payload.get_or_insert_with(Default::default);
                        in_payload = !is_empty;
                    }
                    b"File" if in_payload => {
                        current.add_file(file_from_attributes(&attrs, &scopes)?)
                    }
                    other => debug!(
                        element = %String::from_utf8_lossy(other),
                        "skipping unsupported SWID element"
                    ),
                }
                if !is_empty {
                    depth += 1;
                    scopes.push(ns_bindings(&attrs));
                }
            }
            Event::End(elem) => {
                if elem.local_name().as_ref() == b"Payload" {
                    in_payload = false;
                }
                depth = depth.saturating_sub(1);
                scopes.pop();
                if depth == 0 {
                    if let Some(done) = id.take() {
                        return Ok(Some((done, reader.buffer_position() as usize)));
                    }
                }
            }
            Event::Eof => {
                return match id {
                    None => Ok(None),
                    Some(_) => Err(UswidError::Xml(
                        "unexpected end of input inside SoftwareIdentity".to_string(),
                    )),
                };
            }
            _ => {}
        }
    }
}

fn attributes(elem: &BytesStart<'_>) -> Result<Vec<(String, String)>, UswidError> {
    let mut attrs = Vec::new();
    for attr in elem.attributes() {
        let attr = attr.map_err(UswidError::xml)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(UswidError::xml)?.into_owned();
        attrs.push((key, value));
    }
    Ok(attrs)
}

fn parse_flag(field: &'static str, value: &str) -> Result<bool, UswidError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(UswidError::invalid(field, value)),
    }
}

fn root_from_attributes(attrs: &[(String, String)]) -> Result<SoftwareIdentity, UswidError> {
    let mut id = SoftwareIdentity::default();
    let mut have_tag_id = false;
    let mut have_name = false;
    for (key, value) in attrs {
        match key.as_str() {
            "tagId" => {
                id.tag_id = value.parse().unwrap_or_else(|never| match never {});
                have_tag_id = true;
            }
            "name" => {
                id.software_name = value.clone();
                have_name = true;
            }
            "version" => id.software_version = Some(value.clone()),
            "versionScheme" => {
                id.version_scheme = Some(value.parse().unwrap_or_else(|never| match never {}))
            }
            "tagVersion" => {
                id.tag_version = value
                    .parse()
                    .map_err(|_| UswidError::invalid("tagVersion", value.as_str()))?
            }
            "corpus" => id.corpus = parse_flag("corpus", value)?,
            "patch" => id.patch = parse_flag("patch", value)?,
            "supplemental" => id.supplemental = parse_flag("supplemental", value)?,
            "xml:lang" => id.lang = Some(value.clone()),
            _ => {}
        }
    }
    if !have_tag_id {
        return Err(UswidError::invalid("SoftwareIdentity tagId", ""));
    }
    if !have_name {
        return Err(UswidError::invalid("SoftwareIdentity name", ""));
    }
    Ok(id)
}

fn entity_from_attributes(attrs: &[(String, String)]) -> Result<Entity, UswidError> {
    let mut name = None;
    let mut reg_id = None;
    let mut roles = Vec::new();
    for (key, value) in attrs {
        match key.as_str() {
            "name" => name = Some(value.clone()),
            "regid" => reg_id = Some(value.clone()),
            "role" => {
                roles = value
                    .split_whitespace()
                    .map(str::parse::<Role>)
                    .collect::<Result<Vec<_>, _>>()?
            }
            _ => {}
        }
    }
    Ok(Entity {
        entity_name: name.ok_or_else(|| UswidError::invalid("Entity name", ""))?,
        reg_id,
        roles,
    })
}

fn link_from_attributes(attrs: &[(String, String)]) -> Result<Link, UswidError> {
    let mut href = None;
    let mut rel = None;
    for (key, value) in attrs {
        match key.as_str() {
            "href" => href = Some(value.clone()),
            "rel" => rel = Some(value.parse::<Rel>()?),
            _ => {}
        }
    }
    Ok(Link {
        href: href.ok_or_else(|| UswidError::invalid("Link href", ""))?,
        rel: rel.ok_or_else(|| UswidError::invalid("Link rel", ""))?,
    })
}

fn meta_from_attributes(attrs: &[(String, String)]) -> Result<SoftwareMeta, UswidError> {
    let mut meta = SoftwareMeta::default();
    for (key, value) in attrs {
        if key == "entitlementDataRequired" {
            meta.entitlement_data_required = Some(parse_flag("entitlementDataRequired", value)?);
            continue;
        }
        let slot = SOFTWARE_META_TEXT_FIELDS
            .iter()
            .find(|(_, name)| *name == key.as_str())
            .and_then(|(field, _)| meta.text_field_mut(*field));
        if let Some(slot) = slot {
            *slot = Some(value.clone());
        }
    }
    Ok(meta)
}

fn ns_bindings(attrs: &[(String, String)]) -> NsBindings {
    attrs
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix("xmlns:")
                .map(|prefix| (prefix.to_string(), value.clone()))
        })
        .collect()
}

/// Algorithm id of a `<prefix>:hash` attribute, looking the prefix up on the
/// element itself first and then on its ancestors, innermost first.
fn hash_algorithm(
    prefix: &str,
    attrs: &[(String, String)],
    scopes: &[NsBindings],
) -> Result<u32, UswidError> {
    let own = ns_bindings(attrs);
    let namespace = std::iter::once(&own)
        .chain(scopes.iter().rev())
        .find_map(|bindings| {
            bindings
                .iter()
                .find(|(bound, _)| bound == prefix)
                .map(|(_, namespace)| namespace.as_str())
        })
        .ok_or_else(|| UswidError::invalid("hash namespace prefix", prefix))?;
    HASH_ALGORITHMS
        .iter()
        .find(|(_, _, known)| *known == namespace)
        .map(|(alg_id, _, _)| *alg_id)
        .ok_or_else(|| UswidError::invalid("hash algorithm", namespace))
}

fn file_from_attributes(
    attrs: &[(String, String)],
    scopes: &[NsBindings],
) -> Result<File, UswidError> {
    let mut file = File::new(String::new());
    let mut have_name = false;
    for (key, value) in attrs {
        match key.as_str() {
            "name" => {
                file.fs_name = value.clone();
                have_name = true;
            }
            "size" => {
                file.size = Some(
                    value
                        .parse()
                        .map_err(|_| UswidError::invalid("File size", value.as_str()))?,
                )
            }
            "version" => file.file_version = Some(value.clone()),
            "location" => file.location = Some(value.clone()),
            k if k.ends_with(":hash") => {
                let prefix = &k[..k.len() - ":hash".len()];
                let alg_id = hash_algorithm(prefix, attrs, scopes)?;
                let digest = hex::decode(value)
                    .map_err(|_| UswidError::invalid("File hash", value.as_str()))?;
                file.hash = Some(HashEntry {
                    alg_id,
                    value: digest,
                });
            }
            _ => {}
        }
    }
    if !have_name {
        return Err(UswidError::invalid("File name", ""));
    }
    Ok(file)
}
