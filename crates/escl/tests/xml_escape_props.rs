//! XML 이스케이프 속성 테스트
//!
//! 임의의 텍스트를 요소 내용과 속성 값으로 기록한 뒤 quick-xml로 다시 읽어
//! 원래 문자열이 복원되는지 확인합니다.

use airscan_escl::xml::{XmlDocument, escape};
use proptest::prelude::*;
use quick_xml::Reader;
use quick_xml::events::Event;

/// `<test:Value>` 요소의 텍스트와 `<test:Holder>`의 `name` 속성을 읽습니다.
fn read_back(xml: &str) -> (String, String) {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut attribute = String::new();
    let mut text = String::new();
    let mut in_value = false;
    loop {
        match reader.read_event().expect("well-formed document") {
            Event::Start(e) if e.name().as_ref() == b"test:Holder" => {
                for attr in e.attributes() {
                    let attr = attr.expect("valid attribute");
                    if attr.key.as_ref() == b"name" {
                        attribute = attr.unescape_value().expect("valid entities").into_owned();
                    }
                }
            }
            Event::Start(e) if e.name().as_ref() == b"test:Value" => in_value = true,
            Event::End(e) if e.name().as_ref() == b"test:Value" => in_value = false,
            Event::Text(t) if in_value => {
                text.push_str(&t.unescape().expect("valid entities"));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    (attribute, text)
}

proptest! {
    #[test]
    fn text_and_attributes_survive_a_round_trip(value in "\\PC*") {
        let mut doc = XmlDocument::new();
        doc.open_with("test:Holder", &[("name", value.as_str())])
            .element("test:Value", &value)
            .close("test:Holder");
        let xml = doc.finish();

        let (attribute, text) = read_back(&xml);
        prop_assert_eq!(attribute, value.clone());
        prop_assert_eq!(text, value);
    }

    #[test]
    fn escaped_text_has_no_markup_characters(value in "\\PC*") {
        let escaped = escape(&value);
        prop_assert!(!escaped.contains(['<', '>', '"', '\'']));
        // 남은 '&'는 모두 엔티티의 시작
        for (i, _) in escaped.match_indices('&') {
            let rest = &escaped[i..];
            prop_assert!(
                ["&amp;", "&lt;", "&gt;", "&quot;", "&apos;"]
                    .iter()
                    .any(|entity| rest.starts_with(entity)),
                "bare ampersand in {:?}",
                escaped
            );
        }
    }
}
