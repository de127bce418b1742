// SPDX-FileCopyrightText: Copyright (c) 2025 Semgate Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Generated ExtProc protocol types.
//!
//! The module nesting mirrors the proto package paths so that cross-package
//! references in the generated code resolve.

pub mod envoy {
    pub mod config {
        pub mod core {
            pub mod v3 {
                tonic::include_proto!("envoy.config.core.v3");
            }
        }
    }
    pub mod r#type {
        pub mod v3 {
            tonic::include_proto!("envoy.r#type.v3");
        }
    }
    pub mod service {
        pub mod ext_proc {
            pub mod v3 {
                tonic::include_proto!("envoy.service.ext_proc.v3");
            }
        }
    }
}

pub use envoy::config::core::v3 as core_v3;
pub use envoy::r#type::v3 as type_v3;
pub use envoy::service::ext_proc::v3 as ext_proc_v3;
