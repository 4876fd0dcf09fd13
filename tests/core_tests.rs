use uswid::cbor::encode_identity;
use uswid::{
    generate_tag_id, FileFormat, Link, Rel, SoftwareIdentity, TagId, UswidCollection, UswidError,
    HEADER_LEN, USWID_MAGIC,
};

fn minimal(name: &str) -> SoftwareIdentity {
    SoftwareIdentity::new(generate_tag_id(name), name)
}

#[test]
fn test_two_record_container_layout() {
    let a = minimal("record-one");
    let b = minimal("record-two");
    let a_len = encode_identity(&a).unwrap().len();
    let b_len = encode_identity(&b).unwrap().len();

    let out = UswidCollection::from(vec![a, b]).to_uswid(false).unwrap();

    assert_eq!(out.len(), 24 + a_len + b_len);
    assert_eq!(&out[..16], &USWID_MAGIC);
    assert_eq!(out[16], 0x02);
    assert_eq!(u16::from_le_bytes([out[17], out[18]]), 24);
    assert_eq!(
        u32::from_le_bytes([out[19], out[20], out[21], out[22]]) as usize,
        a_len + b_len
    );
    assert_eq!(out[23], 0x00);
}

#[test]
fn test_compressed_container_sets_flag() {
    let collection = UswidCollection::from(vec![minimal("a"), minimal("b")]);
    let out = collection.to_uswid(true).unwrap();
    assert_eq!(out[23], 0x01);
    // zlib CMF byte for deflate with a 32K window
    assert_eq!(out[HEADER_LEN], 0x78);
}

#[test]
fn test_decode_embedded_in_firmware_image() {
    let collection = UswidCollection::from(vec![minimal("bios"), minimal("ec")]);
    let mut image = vec![0xffu8; 4096];
    image.extend(collection.to_uswid(true).unwrap());
    image.extend(vec![0xffu8; 1024]);

    let mut decoded = UswidCollection::new();
    assert_eq!(decoded.import_uswid(&image).unwrap(), 4096);
    assert_eq!(decoded, collection);
}

#[test]
fn test_decode_without_magic() {
    let err = UswidCollection::new()
        .import_uswid(&[0u8; 512])
        .unwrap_err();
    assert!(matches!(err, UswidError::MagicNotFound));
}

#[test]
fn test_single_record_json_is_object() {
    let collection = UswidCollection::from(vec![minimal("only")]);
    let value: serde_json::Value = serde_json::from_slice(&collection.to_json().unwrap()).unwrap();
    assert_eq!(value["software-name"], "only");
    assert!(value.get("tag-id").is_some());
}

#[test]
fn test_multi_record_json_keeps_order() {
    let collection = UswidCollection::from(vec![minimal("1"), minimal("2"), minimal("3")]);
    let value: serde_json::Value = serde_json::from_slice(&collection.to_json().unwrap()).unwrap();
    let names: Vec<_> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|tag| tag["software-name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["1", "2", "3"]);
}

#[test]
fn test_first_of_collection_links() {
    let mut collection = UswidCollection::from(vec![minimal("A"), minimal("B"), minimal("C")]);
    collection.link_first_to_rest();

    let ids = collection.identities();
    assert_eq!(ids[0].links.len(), 2);
    for (link, child) in ids[0].links.iter().zip(&ids[1..]) {
        assert_eq!(link.rel, Rel::Requires);
        assert_eq!(link.href, child.tag_id.uri());
    }
    assert!(ids[1].links.is_empty());
    assert!(ids[2].links.is_empty());
}

#[test]
fn test_links_survive_container() {
    let mut parent = minimal("parent");
    parent.add_link(Link::requires(&TagId::Text("child".to_string())));
    let collection = UswidCollection::from(vec![parent]);

    let mut decoded = UswidCollection::new();
    decoded
        .import_uswid(&collection.to_uswid(false).unwrap())
        .unwrap();
    assert_eq!(decoded.identities()[0].links[0].href, "swid:child");
}

#[test]
fn test_pc_synthesis_is_deterministic() {
    let pc = "Name: libfoo\nDescription: Foo library\nVersion: 2.0\n";
    let mut first = UswidCollection::new();
    first.import(pc.as_bytes(), FileFormat::PkgConfig, "libfoo.pc").unwrap();
    let mut second = UswidCollection::new();
    second.import(pc.as_bytes(), FileFormat::PkgConfig, "libfoo.pc").unwrap();

    assert_eq!(
        first.identities()[0].tag_id,
        second.identities()[0].tag_id
    );
    assert_ne!(
        first.identities()[0].tag_id,
        TagId::Uuid(generate_tag_id("other.pc"))
    );
}

#[test]
fn test_parent_must_be_single_record() {
    let mut collection = UswidCollection::from(vec![minimal("child")]);
    let parents = UswidCollection::from(vec![minimal("p1"), minimal("p2")]);
    assert!(matches!(
        collection.add_parent(parents),
        Err(UswidError::MultipleIdentitiesInParent(2))
    ));
}

#[test]
fn test_generate_tag_id_known_value() {
    assert_eq!(
        generate_tag_id("python.org").to_string(),
        "886313e1-3b8a-5372-9b90-0c9aee199e5d"
    );
}
