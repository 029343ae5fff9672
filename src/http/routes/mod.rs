pub mod auth;
pub mod discovery;
pub mod filetransfer;
pub mod nio;
pub mod tictactoe;
pub mod voice;
pub mod whiteboard;
