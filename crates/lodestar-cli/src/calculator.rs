//! The demo calculator service.

use lodestar_common::codec::WireCodec;
use lodestar_common::protocol::RpcError;
use lodestar_server::{ServiceBuilder, ServiceDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize, Deserialize, Debug)]
pub struct BinaryOp {
    pub a: i32,
    pub b: i32,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CalcResult {
    pub result: i32,
}

/// Builds the `Calculator` service with `Add`, `Sub`, `Mul`, and `Div`.
pub fn calculator_service(codec: WireCodec) -> Arc<ServiceDescriptor> {
    ServiceBuilder::new("Calculator")
        .typed_method("Add", codec, |op: BinaryOp| {
            Ok(CalcResult {
                result: op.a.wrapping_add(op.b),
            })
        })
        .typed_method("Sub", codec, |op: BinaryOp| {
            Ok(CalcResult {
                result: op.a.wrapping_sub(op.b),
            })
        })
        .typed_method("Mul", codec, |op: BinaryOp| {
            Ok(CalcResult {
                result: op.a.wrapping_mul(op.b),
            })
        })
        .typed_method("Div", codec, |op: BinaryOp| {
            if op.b == 0 {
                Err(RpcError::Handler("division by zero".into()))
            } else {
                Ok(CalcResult {
                    result: op.a / op.b,
                })
            }
        })
        .build_shared()
}
