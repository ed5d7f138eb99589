//! In-memory descriptor pool for tests.
//!
//! ```text
//! package gallactic.v1;
//!
//! service BlockChain {
//!   rpc GetAccount(AddressRequest) returns (Account);
//!   rpc Search(Filter) returns (Block);
//! }
//! service Network {
//!   rpc GetNetworkInfo(Empty) returns (NetInfo);
//! }
//! service Events {
//!   rpc Subscribe(SubscribeRequest) returns (stream Event);
//!   rpc Chat(stream ChatMessage) returns (stream ChatMessage);
//! }
//! ```

use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MethodDescriptorProto, ServiceDescriptorProto,
};

const PACKAGE: &str = "gallactic.v1";

fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        json_name: Some(name.to_string()),
        ..Default::default()
    }
}

fn repeated(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        label: Some(Label::Repeated as i32),
        ..field(name, number, ty)
    }
}

fn typed(name: &str, number: i32, ty: Type, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(format!(".{PACKAGE}.{type_name}")),
        ..field(name, number, ty)
    }
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

fn method(name: &str, input: &str, output: &str, client: bool, server: bool) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(format!(".{PACKAGE}.{input}")),
        output_type: Some(format!(".{PACKAGE}.{output}")),
        client_streaming: Some(client),
        server_streaming: Some(server),
        ..Default::default()
    }
}

fn service(name: &str, methods: Vec<MethodDescriptorProto>) -> ServiceDescriptorProto {
    ServiceDescriptorProto {
        name: Some(name.to_string()),
        method: methods,
        ..Default::default()
    }
}

pub fn file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("gallactic/v1/gateway_test.proto".to_string()),
        package: Some(PACKAGE.to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![
            message("Empty", vec![]),
            message("AddressRequest", vec![field("address", 1, Type::String)]),
            message(
                "Account",
                vec![
                    field("address", 1, Type::String),
                    field("balance", 2, Type::Uint64),
                    field("sequence", 3, Type::Int64),
                    repeated("permissions", 4, Type::String),
                ],
            ),
            message(
                "Range",
                vec![field("start", 1, Type::Uint64), field("end", 2, Type::Uint64)],
            ),
            message(
                "Filter",
                vec![
                    field("name", 1, Type::String),
                    field("limit", 2, Type::Int32),
                    field("offset", 3, Type::Int64),
                    field("page", 4, Type::Uint32),
                    field("total", 5, Type::Uint64),
                    field("verbose", 6, Type::Bool),
                    field("ratio", 7, Type::Double),
                    field("weight", 8, Type::Float),
                    field("token", 9, Type::Bytes),
                    typed("order", 10, Type::Enum, "Order"),
                    repeated("tags", 11, Type::String),
                    repeated("ids", 12, Type::Int64),
                    typed("range", 13, Type::Message, "Range"),
                ],
            ),
            message(
                "Block",
                vec![field("height", 1, Type::Uint64), field("hash", 2, Type::String)],
            ),
            message(
                "NetInfo",
                vec![
                    field("listening", 1, Type::Bool),
                    repeated("peers", 2, Type::String),
                ],
            ),
            message("SubscribeRequest", vec![field("kind", 1, Type::String)]),
            message(
                "Event",
                vec![
                    field("kind", 1, Type::String),
                    field("height", 2, Type::Uint64),
                ],
            ),
            message(
                "ChatMessage",
                vec![field("room", 1, Type::String), field("text", 2, Type::String)],
            ),
        ],
        enum_type: vec![EnumDescriptorProto {
            name: Some("Order".to_string()),
            value: vec![
                EnumValueDescriptorProto {
                    name: Some("ASC".to_string()),
                    number: Some(0),
                    ..Default::default()
                },
                EnumValueDescriptorProto {
                    name: Some("DESC".to_string()),
                    number: Some(1),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }],
        service: vec![
            service(
                "BlockChain",
                vec![
                    method("GetAccount", "AddressRequest", "Account", false, false),
                    method("Search", "Filter", "Block", false, false),
                ],
            ),
            service(
                "Network",
                vec![method("GetNetworkInfo", "Empty", "NetInfo", false, false)],
            ),
            service(
                "Events",
                vec![
                    method("Subscribe", "SubscribeRequest", "Event", false, true),
                    method("Chat", "ChatMessage", "ChatMessage", true, true),
                ],
            ),
        ],
        ..Default::default()
    }
}

pub fn pool() -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file()] })
        .expect("fixture descriptors are valid")
}
