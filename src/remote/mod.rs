// 远端 API 模块
//
// 管线不关心远端服务的具体实现，只依赖 RemoteApi trait：
// 创建上传会话 / 发送分片 / 完成会话 / 创建外链导入 / 轮询导入状态。
// client.rs 提供基于 reqwest 的薄封装实现。

pub mod api;
pub mod client;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use api::RemoteApi;
pub use client::HttpRemoteClient;
pub use types::{ImportPoll, ImportStatus, ImportTicket, UploadSession};
