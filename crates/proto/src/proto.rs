#![allow(clippy::all, missing_docs)]

tonic::include_proto!("csi.v1");
