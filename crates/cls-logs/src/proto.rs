// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CLS structured-log wire messages (proto2 `cls.LogGroupList`).

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Content {
    #[prost(string, required, tag = "1")]
    pub key: String,
    #[prost(string, required, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Log {
    #[prost(int64, required, tag = "1")]
    pub time: i64,
    #[prost(message, repeated, tag = "2")]
    pub contents: Vec<Content>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogTag {
    #[prost(string, required, tag = "1")]
    pub key: String,
    #[prost(string, required, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogGroup {
    #[prost(message, repeated, tag = "1")]
    pub logs: Vec<Log>,
    #[prost(string, optional, tag = "2")]
    pub context_flow: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub filename: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub source: Option<String>,
    #[prost(message, repeated, tag = "5")]
    pub log_tags: Vec<LogTag>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogGroupList {
    #[prost(message, repeated, tag = "1")]
    pub log_group_list: Vec<LogGroup>,
}

impl Content {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
