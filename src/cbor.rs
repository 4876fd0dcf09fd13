//! Single-tag CoSWID binary codec.
//!
//! A tag is one CBOR map with integer keys (RFC 9393). Items are
//! self-delimiting: after [`decode_identity`] the decoder sits on the first
//! byte after the tag, which is what lets tags be concatenated without any
//! framing in a uSWID payload.

use std::convert::Infallible;

use minicbor::data::Type;
use minicbor::{decode, encode, Decoder, Encoder};
use uuid::Uuid;

use crate::error::UswidError;
use crate::identity::{
    Entity, File, HashEntry, Link, Payload, Rel, Role, SoftwareIdentity, SoftwareMeta, TagId,
    VersionScheme, ENTITLEMENT_DATA_REQUIRED,
};

type EncodeResult = Result<(), encode::Error<Infallible>>;

mod keys {
    pub const TAG_ID: u64 = 0;
    pub const SOFTWARE_NAME: u64 = 1;
    pub const ENTITY: u64 = 2;
    pub const LINK: u64 = 4;
    pub const SOFTWARE_META: u64 = 5;
    pub const PAYLOAD: u64 = 6;
    pub const HASH: u64 = 7;
    pub const CORPUS: u64 = 8;
    pub const PATCH: u64 = 9;
    pub const SUPPLEMENTAL: u64 = 11;
    pub const TAG_VERSION: u64 = 12;
    pub const SOFTWARE_VERSION: u64 = 13;
    pub const VERSION_SCHEME: u64 = 14;
    pub const LANG: u64 = 15;
    pub const FILE: u64 = 17;
    pub const SIZE: u64 = 20;
    pub const FILE_VERSION: u64 = 21;
    pub const LOCATION: u64 = 23;
    pub const FS_NAME: u64 = 24;
    pub const ENTITY_NAME: u64 = 31;
    pub const REG_ID: u64 = 32;
    pub const ROLE: u64 = 33;
    pub const HREF: u64 = 38;
    pub const REL: u64 = 40;
}

/// Encode one tag as a self-delimiting CBOR item.
pub fn encode_identity(id: &SoftwareIdentity) -> Result<Vec<u8>, UswidError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    write_identity(&mut enc, id)?;
    Ok(buf)
}

/// Decode exactly one tag from the front of `bytes`, returning it together
/// with the number of bytes it occupied.
pub fn decode_one(bytes: &[u8]) -> Result<(SoftwareIdentity, usize), UswidError> {
    let mut dec = Decoder::new(bytes);
    let id = decode_identity(&mut dec)
        .map_err(|source| UswidError::RecordDecode { offset: 0, source })?;
    Ok((id, dec.position()))
}

fn write_identity(enc: &mut Encoder<&mut Vec<u8>>, id: &SoftwareIdentity) -> EncodeResult {
    let optional = [
        !id.entities.is_empty(),
        !id.links.is_empty(),
        !id.software_meta.is_empty(),
        id.payload.is_some(),
        id.corpus,
        id.patch,
        id.supplemental,
        id.tag_version != 0,
        id.software_version.is_some(),
        id.version_scheme.is_some(),
        id.lang.is_some(),
    ];
    let len = 2 + optional.iter().filter(|present| **present).count();
    enc.map(len as u64)?;

    enc.u64(keys::TAG_ID)?;
    match &id.tag_id {
        TagId::Uuid(uuid) => enc.bytes(uuid.as_bytes())?,
        TagId::Text(text) => enc.str(text)?,
    };
    enc.u64(keys::SOFTWARE_NAME)?.str(&id.software_name)?;

    if !id.entities.is_empty() {
        enc.u64(keys::ENTITY)?.array(id.entities.len() as u64)?;
        for entity in &id.entities {
            write_entity(enc, entity)?;
        }
    }
    if !id.links.is_empty() {
        enc.u64(keys::LINK)?.array(id.links.len() as u64)?;
        for link in &id.links {
            enc.map(2)?;
            enc.u64(keys::HREF)?.str(&link.href)?;
            enc.u64(keys::REL)?.u64(link.rel.code())?;
        }
    }
    if !id.software_meta.is_empty() {
        enc.u64(keys::SOFTWARE_META)?
            .array(id.software_meta.len() as u64)?;
        for meta in &id.software_meta {
            write_software_meta(enc, meta)?;
        }
    }
    if let Some(payload) = &id.payload {
        enc.u64(keys::PAYLOAD)?;
        write_payload(enc, payload)?;
    }
    if id.corpus {
        enc.u64(keys::CORPUS)?.bool(true)?;
    }
    if id.patch {
        enc.u64(keys::PATCH)?.bool(true)?;
    }
    if id.supplemental {
        enc.u64(keys::SUPPLEMENTAL)?.bool(true)?;
    }
    if id.tag_version != 0 {
        enc.u64(keys::TAG_VERSION)?.u64(id.tag_version)?;
    }
    if let Some(version) = &id.software_version {
        enc.u64(keys::SOFTWARE_VERSION)?.str(version)?;
    }
    if let Some(scheme) = &id.version_scheme {
        enc.u64(keys::VERSION_SCHEME)?;
        match scheme.code() {
            Some(code) => enc.u64(code)?,
            None => enc.str(scheme.as_str())?,
        };
    }
    if let Some(lang) = &id.lang {
        enc.u64(keys::LANG)?.str(lang)?;
    }
    Ok(())
}

fn write_entity(enc: &mut Encoder<&mut Vec<u8>>, entity: &Entity) -> EncodeResult {
    let len = 1 + usize::from(entity.reg_id.is_some()) + usize::from(!entity.roles.is_empty());
    enc.map(len as u64)?;
    enc.u64(keys::ENTITY_NAME)?.str(&entity.entity_name)?;
    if let Some(reg_id) = &entity.reg_id {
        enc.u64(keys::REG_ID)?.str(reg_id)?;
    }
    match entity.roles.as_slice() {
        [] => {}
        [role] => {
            enc.u64(keys::ROLE)?.u64(role.code())?;
        }
        roles => {
            enc.u64(keys::ROLE)?.array(roles.len() as u64)?;
            for role in roles {
                enc.u64(role.code())?;
            }
        }
    }
    Ok(())
}

fn write_software_meta(enc: &mut Encoder<&mut Vec<u8>>, meta: &SoftwareMeta) -> EncodeResult {
    enc.map(meta.field_count() as u64)?;
    for key in 43..=57 {
        if key == ENTITLEMENT_DATA_REQUIRED {
            if let Some(required) = meta.entitlement_data_required {
                enc.u64(key)?.bool(required)?;
            }
        } else if let Some(value) = meta.text_field(key) {
            enc.u64(key)?.str(value)?;
        }
    }
    Ok(())
}

fn write_payload(enc: &mut Encoder<&mut Vec<u8>>, payload: &Payload) -> EncodeResult {
    if payload.files.is_empty() {
        enc.map(0)?;
        return Ok(());
    }
    enc.map(1)?;
    enc.u64(keys::FILE)?.array(payload.files.len() as u64)?;
    for file in &payload.files {
        let optional = [
            file.hash.is_some(),
            file.size.is_some(),
            file.file_version.is_some(),
            file.location.is_some(),
        ];
        enc.map(1 + optional.iter().filter(|present| **present).count() as u64)?;
        if let Some(hash) = &file.hash {
            enc.u64(keys::HASH)?
                .array(2)?
                .u32(hash.alg_id)?
                .bytes(&hash.value)?;
        }
        if let Some(size) = file.size {
            enc.u64(keys::SIZE)?.u64(size)?;
        }
        if let Some(version) = &file.file_version {
            enc.u64(keys::FILE_VERSION)?.str(version)?;
        }
        if let Some(location) = &file.location {
            enc.u64(keys::LOCATION)?.str(location)?;
        }
        enc.u64(keys::FS_NAME)?.str(&file.fs_name)?;
    }
    Ok(())
}

/// Decode one tag, leaving `dec` positioned right after it.
pub fn decode_identity(dec: &mut Decoder<'_>) -> Result<SoftwareIdentity, decode::Error> {
    let mut id = SoftwareIdentity::default();
    let mut have_tag_id = false;
    let mut have_name = false;

    for _ in 0..map_len(dec)? {
        let Some(key) = map_key(dec)? else {
            continue;
        };
        match key {
            keys::TAG_ID => {
                id.tag_id = decode_tag_id(dec)?;
                have_tag_id = true;
            }
            keys::SOFTWARE_NAME => {
                id.software_name = dec.str()?.to_string();
                have_name = true;
            }
            keys::ENTITY => id.entities = one_or_more(dec, decode_entity)?,
            keys::LINK => id.links = one_or_more(dec, decode_link)?,
            keys::SOFTWARE_META => id.software_meta = one_or_more(dec, decode_software_meta)?,
            keys::PAYLOAD => id.payload = Some(decode_payload(dec)?),
            keys::CORPUS => id.corpus = dec.bool()?,
            keys::PATCH => id.patch = dec.bool()?,
            keys::SUPPLEMENTAL => id.supplemental = dec.bool()?,
            keys::TAG_VERSION => id.tag_version = dec.u64()?,
            keys::SOFTWARE_VERSION => id.software_version = Some(dec.str()?.to_string()),
            keys::VERSION_SCHEME => id.version_scheme = Some(decode_version_scheme(dec)?),
            keys::LANG => id.lang = Some(dec.str()?.to_string()),
            _ => dec.skip()?,
        }
    }

    if !have_tag_id {
        return Err(decode::Error::message("missing tag-id"));
    }
    if !have_name {
        return Err(decode::Error::message("missing software-name"));
    }
    Ok(id)
}

fn map_len(dec: &mut Decoder<'_>) -> Result<u64, decode::Error> {
    dec.map()?
        .ok_or_else(|| decode::Error::message("indefinite-length map not supported"))
}

/// Read a map key. Non-integer and negative (private use) keys are skipped
/// together with their value.
fn map_key(dec: &mut Decoder<'_>) -> Result<Option<u64>, decode::Error> {
    match dec.datatype()? {
        Type::U8 | Type::U16 | Type::U32 | Type::U64 => Ok(Some(dec.u64()?)),
        _ => {
            dec.skip()?;
            dec.skip()?;
            Ok(None)
        }
    }
}

fn one_or_more<'b, T, F>(dec: &mut Decoder<'b>, mut item: F) -> Result<Vec<T>, decode::Error>
where
    F: FnMut(&mut Decoder<'b>) -> Result<T, decode::Error>,
{
    if dec.datatype()? != Type::Array {
        return Ok(vec![item(dec)?]);
    }
    let len = dec
        .array()?
        .ok_or_else(|| decode::Error::message("indefinite-length array not supported"))?;
    let mut items = Vec::new();
    for _ in 0..len {
        items.push(item(dec)?);
    }
    Ok(items)
}

fn decode_tag_id(dec: &mut Decoder<'_>) -> Result<TagId, decode::Error> {
    match dec.datatype()? {
        Type::Bytes => {
            let bytes = dec.bytes()?;
            let uuid = Uuid::from_slice(bytes)
                .map_err(|_| decode::Error::message("tag-id byte string is not 16 bytes"))?;
            Ok(TagId::Uuid(uuid))
        }
        _ => {
            let text = dec.str()?;
            Ok(text.parse().unwrap_or_else(|never| match never {}))
        }
    }
}

fn decode_version_scheme(dec: &mut Decoder<'_>) -> Result<VersionScheme, decode::Error> {
    match dec.datatype()? {
        Type::String => Ok(dec.str()?.parse().unwrap_or_else(|never| match never {})),
        _ => {
            let code = dec.u64()?;
            VersionScheme::from_code(code)
                .ok_or_else(|| decode::Error::message(format!("unknown version-scheme {}", code)))
        }
    }
}

fn decode_entity(dec: &mut Decoder<'_>) -> Result<Entity, decode::Error> {
    let mut name = None;
    let mut reg_id = None;
    let mut roles = Vec::new();
    for _ in 0..map_len(dec)? {
        match map_key(dec)? {
            Some(keys::ENTITY_NAME) => name = Some(dec.str()?.to_string()),
            Some(keys::REG_ID) => reg_id = Some(dec.str()?.to_string()),
            Some(keys::ROLE) => roles = one_or_more(dec, decode_role)?,
            Some(_) => dec.skip()?,
            None => {}
        }
    }
    Ok(Entity {
        entity_name: name.ok_or_else(|| decode::Error::message("missing entity-name"))?,
        reg_id,
        roles,
    })
}

fn decode_role(dec: &mut Decoder<'_>) -> Result<Role, decode::Error> {
    match dec.datatype()? {
        Type::String => dec
            .str()?
            .parse()
            .map_err(|e: UswidError| decode::Error::message(e.to_string())),
        _ => {
            let code = dec.u64()?;
            Role::from_code(code)
                .ok_or_else(|| decode::Error::message(format!("unknown entity role {}", code)))
        }
    }
}

fn decode_link(dec: &mut Decoder<'_>) -> Result<Link, decode::Error> {
    let mut href = None;
    let mut rel = None;
    for _ in 0..map_len(dec)? {
        match map_key(dec)? {
            Some(keys::HREF) => href = Some(dec.str()?.to_string()),
            Some(keys::REL) => rel = Some(decode_rel(dec)?),
            Some(_) => dec.skip()?,
            None => {}
        }
    }
    Ok(Link {
        href: href.ok_or_else(|| decode::Error::message("missing link href"))?,
        rel: rel.ok_or_else(|| decode::Error::message("missing link rel"))?,
    })
}

fn decode_rel(dec: &mut Decoder<'_>) -> Result<Rel, decode::Error> {
    match dec.datatype()? {
        Type::String => dec
            .str()?
            .parse()
            .map_err(|e: UswidError| decode::Error::message(e.to_string())),
        _ => {
            let code = dec.u64()?;
            Rel::from_code(code)
                .ok_or_else(|| decode::Error::message(format!("unknown link rel {}", code)))
        }
    }
}

fn decode_software_meta(dec: &mut Decoder<'_>) -> Result<SoftwareMeta, decode::Error> {
    let mut meta = SoftwareMeta::default();
    for _ in 0..map_len(dec)? {
        let Some(key) = map_key(dec)? else {
            continue;
        };
        if key == ENTITLEMENT_DATA_REQUIRED {
            meta.entitlement_data_required = Some(dec.bool()?);
        } else if meta.text_field_mut(key).is_some() {
            let value = dec.str()?.to_string();
            if let Some(slot) = meta.text_field_mut(key) {
                *slot = Some(value);
            }
        } else {
            dec.skip()?;
        }
    }
    Ok(meta)
}

fn decode_payload(dec: &mut Decoder<'_>) -> Result<Payload, decode::Error> {
    let mut payload = Payload::default();
    for _ in 0..map_len(dec)? {
        match map_key(dec)? {
            Some(keys::FILE) => payload.files = one_or_more(dec, decode_file)?,
            Some(_) => dec.skip()?,
            None => {}
        }
    }
    Ok(payload)
}

fn decode_file(dec: &mut Decoder<'_>) -> Result<File, decode::Error> {
    let mut fs_name = None;
    let mut file = File::new(String::new());
    for _ in 0..map_len(dec)? {
        match map_key(dec)? {
            Some(keys::FS_NAME) => fs_name = Some(dec.str()?.to_string()),
            Some(keys::SIZE) => file.size = Some(dec.u64()?),
            Some(keys::FILE_VERSION) => file.file_version = Some(dec.str()?.to_string()),
            Some(keys::LOCATION) => file.location = Some(dec.str()?.to_string()),
            Some(keys::HASH) => {
                if dec.array()? != Some(2) {
                    return Err(decode::Error::message("hash-entry must be a 2 element array"));
                }
                let alg_id = dec.u32()?;
                let value = dec.bytes()?.to_vec();
                file.hash = Some(HashEntry { alg_id, value });
            }
            Some(_) => dec.skip()?,
            None => {}
        }
    }
    file.fs_name = fs_name.ok_or_else(|| decode::Error::message("missing fs-name"))?;
    Ok(file)
}
