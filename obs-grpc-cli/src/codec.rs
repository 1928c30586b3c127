//! # JSON Codec
//!
//! A `tonic::codec::Codec` whose items are `serde_json::Value`s. Requests are checked
//! against the method's input descriptor before they are encoded; responses are rendered
//! as proto3 JSON with every field present, so `false` and `0` are printed rather than
//! silently dropped.

use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, SerializeOptions};
use serde_json::Value;
use tonic::Status;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};

/// A `tonic` codec for one method of the proxy, driven by its descriptors.
pub struct JsonCodec {
    /// Schema of the request message.
    input: MessageDescriptor,
    /// Schema of the response message.
    output: MessageDescriptor,
}

impl JsonCodec {
    /// Creates a new `JsonCodec`.
    ///
    /// # Arguments
    /// * `input` - Descriptor of the method's request message.
    /// * `output` - Descriptor of the method's response message.
    pub fn new(input: MessageDescriptor, output: MessageDescriptor) -> Self {
        Self { input, output }
    }
}

impl Codec for JsonCodec {
    type Encode = Value;
    type Decode = Value;

    type Encoder = JsonEncoder;
    type Decoder = JsonDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        JsonEncoder(self.input.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder(self.output.clone())
    }
}

/// Checks a JSON body against the request schema and writes it as protobuf.
pub struct JsonEncoder(MessageDescriptor);

impl Encoder for JsonEncoder {
    type Item = Value;
    type Error = Status;

    fn encode(&mut self, item: Value, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        let message = DynamicMessage::deserialize(self.0.clone(), item).map_err(|e| {
            Status::invalid_argument(format!("the body is not a valid {}: {e}", self.0.name()))
        })?;

        message.encode_raw(dst);
        Ok(())
    }
}

/// Reads protobuf bytes with the response schema and renders them as JSON.
pub struct JsonDecoder(MessageDescriptor);

impl Decoder for JsonDecoder {
    type Item = Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Value>, Status> {
        let mut message = DynamicMessage::new(self.0.clone());
        message
            .merge(src)
            .map_err(|e| Status::internal(format!("unable to decode {}: {e}", self.0.name())))?;

        to_json(&message).map(Some)
    }
}

/// Proto3 JSON with default values kept: `int64` as strings, `bytes` as base64.
fn to_json(message: &DynamicMessage) -> Result<Value, Status> {
    let options = SerializeOptions::new().skip_default_fields(false);
    message
        .serialize_with_options(serde_json::value::Serializer, &options)
        .map_err(|e| Status::internal(format!("unable to render the response as JSON: {e}")))
}
