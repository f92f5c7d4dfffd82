//! XML导出文件的轻量元素树
//!
//! 导出文件体积小、结构固定，整体读入内存后按路径取值，
//! 脱敏时原地修改再写回。

use crate::error::{DeidError, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fs;
use std::path::Path;

/// XML元素节点
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlNode {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// 带文本的叶子节点
    pub fn leaf(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_child(mut self, child: XmlNode) -> Self {
        self.children.push(child);
        self
    }

    /// 解析XML文本，返回根元素
    pub fn parse_str(xml: &str) -> Result<XmlNode> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => stack.push(Self::from_start(&e)?),
                Ok(Event::Empty(e)) => {
                    let node = Self::from_start(&e)?;
                    Self::attach(&mut stack, &mut root, node)?;
                }
                Ok(Event::Text(e)) => {
                    let text = e
                        .unescape()
                        .map_err(|e| DeidError::XmlParse(format!("文本解码失败: {}", e)))?;
                    if let Some(node) = stack.last_mut() {
                        node.text.get_or_insert_with(String::new).push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    if let Some(node) = stack.last_mut() {
                        node.text.get_or_insert_with(String::new).push_str(&text);
                    }
                }
                Ok(Event::End(_)) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| DeidError::XmlParse("多余的结束标签".to_string()))?;
                    Self::attach(&mut stack, &mut root, node)?;
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(DeidError::XmlParse(format!(
                        "位置 {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(DeidError::XmlParse(format!("元素未闭合: {}", open.tag)));
        }
        root.ok_or_else(|| DeidError::XmlParse("文档没有根元素".to_string()))
    }

    /// 读取XML文件
    pub fn read_file(path: &Path) -> Result<XmlNode> {
        let content = fs::read_to_string(path)?;
        Self::parse_str(&content)
    }

    fn from_start(start: &BytesStart<'_>) -> Result<XmlNode> {
        let mut node = XmlNode::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
        for attr in start.attributes() {
            let attr = attr.map_err(|e| DeidError::XmlParse(format!("属性解析失败: {}", e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| DeidError::XmlParse(format!("属性解码失败: {}", e)))?
                .into_owned();
            node.attributes.push((key, value));
        }
        Ok(node)
    }

    fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) -> Result<()> {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(node);
        } else if root.is_none() {
            *root = Some(node);
        } else {
            return Err(DeidError::XmlParse("文档存在多个根元素".to_string()));
        }
        Ok(())
    }

    /// 第一个指定标签的子元素
    pub fn child(&self, tag: &str) -> Option<&XmlNode> {
        self.children.iter().find(|child| child.tag == tag)
    }

    pub fn child_mut(&mut self, tag: &str) -> Option<&mut XmlNode> {
        self.children.iter_mut().find(|child| child.tag == tag)
    }

    /// 按 `a/b/c` 路径查找后代元素
    pub fn find(&self, path: &str) -> Option<&XmlNode> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.child(segment))
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut XmlNode> {
        let mut node = self;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            node = node.child_mut(segment)?;
        }
        Some(node)
    }

    /// 去除首尾空白后的文本，空文本视为缺失
    pub fn text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    pub fn child_text(&self, tag: &str) -> Option<&str> {
        self.child(tag).and_then(XmlNode::text)
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }

    /// 序列化为带XML声明的文本
    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(|e| DeidError::XmlParse(format!("写出XML声明失败: {}", e)))?;
        self.write_into(&mut writer)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| DeidError::Internal(format!("XML输出不是合法UTF-8: {}", e)))
    }

    /// 写入文件，必要时创建父目录
    pub fn write_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_xml_string()?)?;
        Ok(())
    }

    fn write_into(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        let write_error = |e: &dyn std::fmt::Display| {
            DeidError::XmlParse(format!("写出元素 {} 失败: {}", self.tag, e))
        };

        let mut start = BytesStart::new(self.tag.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.children.is_empty() && self.text.is_none() {
            return writer
                .write_event(Event::Empty(start))
                .map_err(|e| write_error(&e));
        }

        writer
            .write_event(Event::Start(start))
            .map_err(|e| write_error(&e))?;
        if let Some(text) = &self.text {
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|e| write_error(&e))?;
        }
        for child in &self.children {
            child.write_into(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.tag.as_str())))
            .map_err(|e| write_error(&e))
    }
}
