//! 待处理条目与分片

use crate::models::Endpoint;

/// 一条待处理文本及其在原始列表中的下标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub index: usize,
    pub text: String,
}

impl WorkItem {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// 按提交顺序编号
    pub fn from_texts<I, S>(texts: I) -> Vec<WorkItem>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| WorkItem::new(index, text))
            .collect()
    }
}

/// 分片：原始列表中连续的一段，加上当前分配到的端点
///
/// 故障转移时由分发器调用 [`Chunk::reassign`] 改派。
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: usize,
    pub items: Vec<WorkItem>,
    pub endpoint: Endpoint,
}

impl Chunk {
    pub fn new(id: usize, items: Vec<WorkItem>, endpoint: Endpoint) -> Self {
        Self {
            id,
            items,
            endpoint,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 分片内条目的原始下标
    pub fn indices(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.index).collect()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.text.as_str()).collect()
    }

    pub fn reassign(&mut self, endpoint: Endpoint) {
        self.endpoint = endpoint;
    }
}
