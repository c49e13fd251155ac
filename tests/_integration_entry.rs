// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

#![allow(clippy::all)]

mod integration_tests {
    pub mod common;

    pub mod binary_fragmentation;
    pub mod close_reciprocity;
    pub mod ping_timeout_close;
    pub mod server_stop_two_clients;
    pub mod text_echo;
}
