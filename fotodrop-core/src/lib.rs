mod client;

pub use client::{
    FotodropClient, FotodropError, PhotoRecord, PhotoStatus, PresignTicket, UploadRecord,
    UploadState,
};
