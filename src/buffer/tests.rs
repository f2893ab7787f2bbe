//! Unit tests for the reassembly, forwarding and send buffers.

mod rbuf_tests;
