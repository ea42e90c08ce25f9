pub mod frame_codec;
pub mod upload_frame;

pub use frame_codec::{Frame, FRAME_HEX_LEN};
pub use upload_frame::{build_upload_frame, generate_hash};
