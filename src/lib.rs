// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod cfg;
pub mod deflate;
pub mod error;
pub mod handshake;
pub mod http;
pub mod server;
pub mod transport;
pub mod utils;
pub mod websocket;
