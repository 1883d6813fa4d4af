// SPDX-License-Identifier: Apache-2.0

pub(crate) mod candidate;
pub(crate) mod message;
pub(crate) mod page;
