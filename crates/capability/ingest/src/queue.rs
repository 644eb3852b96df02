use domain::DevicePayload;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// 入站队列错误。
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("ingress queue is full")]
    Full,
    #[error("ingress queue is closed")]
    Closed,
}

/// 创建固定容量的入站队列。
pub fn ingress_queue(capacity: usize) -> (IngressSender, IngressReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (IngressSender { sender }, IngressReceiver { receiver })
}

/// 入站队列发送端（投递循环持有）。
#[derive(Debug)]
pub struct IngressSender {
    sender: mpsc::Sender<DevicePayload>,
}

impl IngressSender {
    /// 非阻塞投递；队列满时直接返回 `Full`，由调用方丢弃消息。
    pub fn try_send(&self, payload: DevicePayload) -> Result<(), QueueError> {
        self.sender.try_send(payload).map_err(|err| match err {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

/// 入站队列接收端（唯一消费者）。
#[derive(Debug)]
pub struct IngressReceiver {
    receiver: mpsc::Receiver<DevicePayload>,
}

impl IngressReceiver {
    /// 等待下一条消息；发送端关闭且队列排空后返回 `None`。
    pub async fn recv(&mut self) -> Option<DevicePayload> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DevicePayload> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
