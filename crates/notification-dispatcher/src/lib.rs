//! 通知分发服务
//!
//! 消费文档变更事件（新消息、新商品、店铺开启促销），解析收件人，
//! 按用户偏好和免打扰时段过滤后，通过推送网关并发投递。
//! 单个收件人失败不影响其他收件人，事件处理本身永远正常结束。

pub mod clock;
pub mod composer;
pub mod consumer;
pub mod delivery;
pub mod error;
pub mod event;
pub mod gateway;
pub mod models;
pub mod preferences;
pub mod resolver;
pub mod router;
pub mod store;
