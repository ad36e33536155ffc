use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

use crate::error::Error;
use crate::proto::frame::unpack_header;
use crate::proto::frame::ContinuationFrame;
use crate::proto::frame::HttpFrame;
use crate::proto::frame::RawFrame;
use crate::proto::frame::FRAME_HEADER_LEN;

/// Reads whole frames off the transport.
///
/// Header-block fragments split across CONTINUATION frames are joined here,
/// so the session only ever sees complete HEADERS / PUSH_PROMISE frames.
pub struct FramedRead<R: AsyncRead + Unpin> {
    read: R,
}

/// Control frames may carry a few octets beyond the advertised DATA limit
/// (priority fields, padding headers).
const FRAME_SIZE_SLACK: u32 = 0x100;

impl<R: AsyncRead + Unpin> FramedRead<R> {
    pub fn new(read: R) -> FramedRead<R> {
        FramedRead { read }
    }

    /// Read one frame. Returns `None` on clean EOF at a frame boundary;
    /// EOF mid-frame is an error.
    pub async fn recv_frame(&mut self, max_frame_size: u32) -> crate::Result<Option<HttpFrame>> {
        let raw = match self.recv_raw_frame(max_frame_size).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let frame = HttpFrame::from_raw(raw)?;
        let frame = match frame {
            HttpFrame::Headers(mut headers) => {
                if !headers.is_end_of_headers() {
                    self.join_continuations(headers.stream_id, max_frame_size, |fragment| {
                        headers.extend_fragment(fragment)
                    })
                    .await?;
                }
                HttpFrame::Headers(headers)
            }
            HttpFrame::PushPromise(mut push) => {
                if !push.is_end_of_headers() {
                    self.join_continuations(push.stream_id, max_frame_size, |fragment| {
                        push.extend_fragment(fragment)
                    })
                    .await?;
                }
                HttpFrame::PushPromise(push)
            }
            HttpFrame::Continuation(..) => return Err(Error::ContinuationFrameWithoutHeaders),
            other => other,
        };

        trace!("received frame: {:?}", frame);
        Ok(Some(frame))
    }

    async fn join_continuations<F: FnMut(&[u8])>(
        &mut self,
        stream_id: u32,
        max_frame_size: u32,
        mut append: F,
    ) -> crate::Result<()> {
        loop {
            let raw = match self.recv_raw_frame(max_frame_size).await? {
                Some(raw) => raw,
                None => {
                    return Err(Error::IoError(std::io::Error::from(
                        std::io::ErrorKind::UnexpectedEof,
                    )))
                }
            };

            if raw.header().frame_type != crate::proto::frame::continuation::CONTINUATION_FRAME_TYPE
            {
                return Err(Error::ExpectingContinuationGot(raw.header().frame_type));
            }
            let cont = ContinuationFrame::from_raw(&raw)?;
            if cont.stream_id != stream_id {
                return Err(Error::ExpectingContinuationGotDifferentStreamId(
                    stream_id,
                    cont.stream_id,
                ));
            }

            append(&cont.header_fragment);

            if cont.is_end_of_headers() {
                return Ok(());
            }
        }
    }

    async fn recv_raw_frame(&mut self, max_frame_size: u32) -> crate::Result<Option<RawFrame>> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut filled = 0;
        while filled < FRAME_HEADER_LEN {
            let n = self.read.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::IoError(std::io::Error::from(
                    std::io::ErrorKind::UnexpectedEof,
                )));
            }
            filled += n;
        }

        let header = unpack_header(&header);
        if header.payload_len > max_frame_size + FRAME_SIZE_SLACK {
            return Err(Error::PayloadTooLarge(header.payload_len, max_frame_size));
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        self.read.read_exact(&mut payload).await?;

        Ok(Some(RawFrame::new(header, payload.into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::ContinuationFlag;
    use crate::proto::frame::FrameIR;
    use crate::proto::frame::HeadersFlag;
    use crate::proto::frame::HeadersFrame;
    use crate::proto::frame::PingFrame;

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    #[test]
    fn reads_single_frame_then_eof() {
        let bytes = PingFrame::new(7).serialize_into_vec();
        block_on(async {
            let mut read = FramedRead::new(&bytes[..]);
            match read.recv_frame(16384).await.unwrap() {
                Some(HttpFrame::Ping(ping)) => assert_eq!(7, ping.opaque_data),
                other => panic!("unexpected: {:?}", other),
            }
            assert!(read.recv_frame(16384).await.unwrap().is_none());
        });
    }

    #[test]
    fn joins_continuation_frames() {
        let mut bytes = Vec::new();
        let mut headers = HeadersFrame::new(&b"ab"[..], 1);
        headers.set_flag(HeadersFlag::EndStream);
        bytes.extend(headers.serialize_into_vec());
        bytes.extend(ContinuationFrame::new(&b"cd"[..], 1).serialize_into_vec());
        let mut last = ContinuationFrame::new(&b"ef"[..], 1);
        last.set_flag(ContinuationFlag::EndHeaders);
        bytes.extend(last.serialize_into_vec());

        block_on(async {
            let mut read = FramedRead::new(&bytes[..]);
            match read.recv_frame(16384).await.unwrap() {
                Some(HttpFrame::Headers(headers)) => {
                    assert_eq!(&b"abcdef"[..], &headers.header_fragment[..]);
                    assert!(headers.is_end_of_stream());
                }
                other => panic!("unexpected: {:?}", other),
            }
        });
    }

    #[test]
    fn continuation_for_other_stream_is_error() {
        let mut bytes = Vec::new();
        bytes.extend(HeadersFrame::new(&b"ab"[..], 1).serialize_into_vec());
        bytes.extend(ContinuationFrame::new(&b"cd"[..], 3).serialize_into_vec());

        block_on(async {
            let mut read = FramedRead::new(&bytes[..]);
            match read.recv_frame(16384).await {
                Err(Error::ExpectingContinuationGotDifferentStreamId(1, 3)) => {}
                other => panic!("unexpected: {:?}", other),
            }
        });
    }

    #[test]
    fn bare_continuation_is_error() {
        let bytes = ContinuationFrame::new(&b"cd"[..], 1).serialize_into_vec();
        block_on(async {
            let mut read = FramedRead::new(&bytes[..]);
            match read.recv_frame(16384).await {
                Err(Error::ContinuationFrameWithoutHeaders) => {}
                other => panic!("unexpected: {:?}", other),
            }
        });
    }

    #[test]
    fn oversized_frame_is_error() {
        let bytes = crate::proto::frame::pack_header(&crate::proto::frame::FrameHeader::new(
            1 << 20,
            0x0,
            0,
            1,
        ));
        block_on(async {
            let mut read = FramedRead::new(&bytes[..]);
            match read.recv_frame(16384).await {
                Err(Error::PayloadTooLarge(..)) => {}
                other => panic!("unexpected: {:?}", other),
            }
        });
    }
}
