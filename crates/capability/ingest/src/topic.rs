/// topic 解析错误。
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("unexpected topic shape: {0}")]
    Shape(String),
    #[error("empty device id in topic: {0}")]
    EmptyDevice(String),
}

/// 从 `/{prefix}/{device_id}/get` 中取出设备 ID。
///
/// 按 `/` 切分后必须恰好 4 段（首段为空）。
pub fn parse_device_topic(topic: &str) -> Result<String, TopicError> {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() != 4 {
        return Err(TopicError::Shape(topic.to_string()));
    }
    let device_id = segments[2];
    if device_id.is_empty() {
        return Err(TopicError::EmptyDevice(topic.to_string()));
    }
    Ok(device_id.to_string())
}
