//! eSCL XML 문서 작성기
//!
//! 서버 기술자, 스캐너 능력, 상태 문서는 모두 같은 형태를 따릅니다:
//! 작은따옴표 XML 선언, 네임스페이스 접두어(`airsane`, `pwg`, `scan`),
//! 요소마다 `\r\n` 줄바꿈. [`XmlDocument`]는 이 형태를 강제하고
//! 모든 텍스트 내용을 [`escape`]로 이스케이프합니다.

use std::borrow::Cow;
use std::fmt::Display;

/// AirSane 서버 기술자 네임스페이스
pub const NS_AIRSANE: &str = "http://heliumnet.nl/schemas/airsane/2019/08";
/// PWG semantic model 네임스페이스
pub const NS_PWG: &str = "http://www.pwg.org/schemas/2010/12/sm";
/// eSCL 네임스페이스
pub const NS_SCAN: &str = "http://schemas.hp.com/imaging/escl/2011/05/03";

const PROLOG: &str = "<?xml version='1.0' encoding='UTF-8'?>";
const EOL: &str = "\r\n";

/// XML 특수 문자(`"`, `'`, `&`, `<`, `>`)를 엔티티로 치환합니다.
///
/// 치환할 문자가 없으면 입력을 그대로 빌려 돌려줍니다.
pub fn escape(text: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(text)
}

/// 줄 단위 eSCL XML 문서 버퍼
#[derive(Debug)]
pub struct XmlDocument {
    buf: String,
}

impl XmlDocument {
    /// XML 선언으로 시작하는 새 문서
    pub fn new() -> Self {
        let mut buf = String::with_capacity(2048);
        buf.push_str(PROLOG);
        buf.push_str(EOL);
        Self { buf }
    }

    /// `<tag>`
    pub fn open(&mut self, tag: &str) -> &mut Self {
        self.buf.push('<');
        self.buf.push_str(tag);
        self.buf.push('>');
        self.buf.push_str(EOL);
        self
    }

    /// `<tag a='v' ...>`. 속성 값은 이스케이프됩니다.
    pub fn open_with(&mut self, tag: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.buf.push('<');
        self.buf.push_str(tag);
        for (name, value) in attrs {
            self.buf.push(' ');
            self.buf.push_str(name);
            self.buf.push_str("='");
            self.buf.push_str(&escape(value));
            self.buf.push('\'');
        }
        self.buf.push('>');
        self.buf.push_str(EOL);
        self
    }

    /// `</tag>`
    pub fn close(&mut self, tag: &str) -> &mut Self {
        self.buf.push_str("</");
        self.buf.push_str(tag);
        self.buf.push('>');
        self.buf.push_str(EOL);
        self
    }

    /// `<tag>text</tag>`
    pub fn element(&mut self, tag: &str, text: impl Display) -> &mut Self {
        let text = text.to_string();
        self.buf.push('<');
        self.buf.push_str(tag);
        self.buf.push('>');
        self.buf.push_str(&escape(&text));
        self.buf.push_str("</");
        self.buf.push_str(tag);
        self.buf.push('>');
        self.buf.push_str(EOL);
        self
    }

    /// `<tag />`
    pub fn empty(&mut self, tag: &str) -> &mut Self {
        self.buf.push('<');
        self.buf.push_str(tag);
        self.buf.push_str(" />");
        self.buf.push_str(EOL);
        self
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

impl Default for XmlDocument {
    fn default() -> Self {
        Self::new()
    }
}
