//! SOAP 1.2 报文构造与响应解析。

use crate::DeviceError;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

pub(crate) const NS_DEVICE: &str = "http://www.onvif.org/ver10/device/wsdl";
pub(crate) const NS_MEDIA: &str = "http://www.onvif.org/ver10/media/wsdl";
pub(crate) const NS_PTZ: &str = "http://www.onvif.org/ver20/ptz/wsdl";
pub(crate) const NS_SCHEMA: &str = "http://www.onvif.org/ver10/schema";

const NS_ENVELOPE: &str = "http://www.w3.org/2003/05/soap-envelope";
const NS_WSSE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const PASSWORD_TEXT: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";

/// 组装带 UsernameToken 的 SOAP 信封。用户名为空时不带安全头。
pub(crate) fn envelope(username: &str, password: &str, body: &str) -> String {
    let header = if username.is_empty() {
        String::new()
    } else {
        format!(
            concat!(
                r#"<s:Header><wsse:Security xmlns:wsse="{wsse}" s:mustUnderstand="1">"#,
                r#"<wsse:UsernameToken><wsse:Username>{user}</wsse:Username>"#,
                r#"<wsse:Password Type="{kind}">{pass}</wsse:Password>"#,
                r#"</wsse:UsernameToken></wsse:Security></s:Header>"#
            ),
            wsse = NS_WSSE,
            user = escape(username),
            kind = PASSWORD_TEXT,
            pass = escape(password),
        )
    };
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<s:Envelope xmlns:s="{env}" xmlns:tds="{tds}" xmlns:trt="{trt}" "#,
            r#"xmlns:tptz="{tptz}" xmlns:tt="{tt}">{header}<s:Body>{body}</s:Body></s:Envelope>"#
        ),
        env = NS_ENVELOPE,
        tds = NS_DEVICE,
        trt = NS_MEDIA,
        tptz = NS_PTZ,
        tt = NS_SCHEMA,
        header = header,
        body = body,
    )
}

/// 轻量 XML 元素树（只保留本地名，忽略命名空间前缀）。
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn parse(xml: &str) -> Result<Element, DeviceError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => stack.push(element_from(&start)?),
                Ok(Event::Empty(start)) => {
                    let element = element_from(&start)?;
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::End(_)) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| DeviceError::Parse("unbalanced xml".to_string()))?;
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::Text(text)) => {
                    let text = text
                        .unescape()
                        .map_err(|err| DeviceError::Parse(err.to_string()))?;
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text);
                    }
                }
                Ok(Event::CData(data)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text
                            .push_str(&String::from_utf8_lossy(data.into_inner().as_ref()));
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(DeviceError::Parse(err.to_string())),
            }
        }
        root.ok_or_else(|| DeviceError::Parse("empty xml document".to_string()))
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    /// 深度优先查找第一个同名后代（含自身）。
    pub fn find(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// 收集所有同名后代。
    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        if self.name == name {
            out.push(self);
        }
        for child in &self.children {
            child.find_all(name, out);
        }
    }

    /// 先找 `path[0]` 的后代，再逐级按子元素下钻。
    pub fn path(&self, path: &[&str]) -> Option<&Element> {
        let (first, rest) = path.split_first()?;
        let mut current = self.find(first)?;
        for name in rest {
            current = current.child(name)?;
        }
        Some(current)
    }

    pub fn path_text(&self, path: &[&str]) -> Option<&str> {
        self.path(path)
            .map(|element| element.text.trim())
            .filter(|text| !text.is_empty())
    }
}

/// 若响应是 SOAP Fault，取出错误码与原因。
pub(crate) fn fault(document: &Element) -> Option<DeviceError> {
    let fault = document.find("Fault")?;
    let code = fault
        .path_text(&["Subcode", "Value"])
        .or_else(|| fault.path_text(&["Code", "Value"]))
        .or_else(|| fault.path_text(&["faultcode"]))
        .unwrap_or("unknown")
        .to_string();
    let reason = fault
        .path_text(&["Reason", "Text"])
        .or_else(|| fault.path_text(&["faultstring"]))
        .unwrap_or_default()
        .to_string();
    Some(DeviceError::Fault { code, reason })
}

fn element_from(start: &BytesStart<'_>) -> Result<Element, DeviceError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| DeviceError::Parse(err.to_string()))?;
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|err| DeviceError::Parse(err.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_escapes_credentials() {
        let xml = envelope("admin", "a<b&c", "<tds:GetCapabilities/>");
        assert!(xml.contains("<wsse:Username>admin</wsse:Username>"));
        assert!(xml.contains("a&lt;b&amp;c"));
        assert!(xml.contains("<s:Body><tds:GetCapabilities/></s:Body>"));
    }

    #[test]
    fn envelope_without_username_has_no_header() {
        let xml = envelope("", "", "<trt:GetProfiles/>");
        assert!(!xml.contains("Security"));
    }

    #[test]
    fn parse_ignores_prefixes() {
        let xml = r#"<s:Envelope xmlns:s="x" xmlns:trt="y" xmlns:tt="z"><s:Body>
            <trt:GetProfilesResponse>
              <trt:Profiles token="Profile_1" fixed="true"><tt:Name>mainStream</tt:Name></trt:Profiles>
              <trt:Profiles token="Profile_2"><tt:Name>subStream</tt:Name></trt:Profiles>
            </trt:GetProfilesResponse></s:Body></s:Envelope>"#;
        let document = Element::parse(xml).unwrap();
        let profile = document.find("Profiles").unwrap();
        assert_eq!(profile.attribute("token"), Some("Profile_1"));
        assert_eq!(profile.child("Name").unwrap().text, "mainStream");

        let mut all = Vec::new();
        document.find_all("Profiles", &mut all);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn fault_code_and_reason_are_extracted() {
        let xml = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:ter="t">
            <env:Body><env:Fault>
              <env:Code><env:Value>env:Sender</env:Value>
                <env:Subcode><env:Value>ter:NotAuthorized</env:Value></env:Subcode></env:Code>
              <env:Reason><env:Text xml:lang="en">Sender not Authorized</env:Text></env:Reason>
            </env:Fault></env:Body></env:Envelope>"#;
        let document = Element::parse(xml).unwrap();
        match fault(&document) {
            Some(DeviceError::Fault { code, reason }) => {
                assert_eq!(code, "ter:NotAuthorized");
                assert_eq!(reason, "Sender not Authorized");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_xml_is_parse_error() {
        assert!(matches!(
            Element::parse("<a><b></a>"),
            Err(DeviceError::Parse(_))
        ));
    }
}
