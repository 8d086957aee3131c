// Container handling: box events and contents, brotli compressed boxes,
// reconstruction metadata and the framing errors of malformed files.

#[cfg(test)]
mod container_boxes {
    use jxcodec_rs::constants::CONTAINER_SIGNATURE;
    use jxcodec_rs::container::write_box;
    use jxcodec_rs::encoder::{Encoder, FrameImage, FrameSettings, ImageSettings};
    use jxcodec_rs::reconstruction::ReconstructionMetadata;
    use jxcodec_rs::{BoxType, CodecError, Decoder, DecoderStatus, ErrorCategory, Events};

    fn bare_codestream() -> Vec<u8> {
        let mut encoder = Encoder::new(ImageSettings::gray(4, 4));
        encoder
            .add_frame(FrameSettings::default(), FrameImage::filled(4, 4, 1, 60))
            .unwrap();
        encoder.finish().unwrap()
    }

    fn ftyp() -> Vec<u8> {
        let mut contents = b"jxl ".to_vec();
        contents.extend_from_slice(&[0, 0, 0, 0]);
        contents.extend_from_slice(b"jxl ");
        contents
    }

    /// Signature and file type boxes followed by `boxes`.
    fn container(boxes: &[(BoxType, Vec<u8>)]) -> Vec<u8> {
        let mut out = CONTAINER_SIGNATURE.to_vec();
        write_box(&mut out, BoxType::FTYP, &ftyp(), false);
        for (box_type, contents) in boxes {
            write_box(&mut out, *box_type, contents, false);
        }
        out
    }

    fn first_error(data: &[u8], events: Events) -> CodecError {
        let mut decoder = Decoder::new();
        decoder.subscribe_events(events).unwrap();
        decoder.set_input(data).unwrap();
        decoder.close_input();
        loop {
            match decoder.process() {
                Ok(DecoderStatus::Success) => panic!("decoded without error"),
                Ok(_) => {}
                Err(err) => {
                    assert_eq!(decoder.process(), Err(CodecError::DecoderInErrorState));
                    return err;
                }
            }
        }
    }

    #[derive(Debug)]
    struct SeenBox {
        box_type: BoxType,
        decoded_type: BoxType,
        size: u64,
        contents: Vec<u8>,
    }

    fn list_boxes(data: &[u8], decompress: bool) -> Vec<SeenBox> {
        let mut buffers = vec![vec![0u8; 512]; 64];
        let mut seen: Vec<SeenBox> = Vec::new();
        let mut free = buffers.iter_mut();
        let mut decoder = Decoder::new();
        decoder.subscribe_events(Events::BOX).unwrap();
        decoder.set_decompress_boxes(decompress);
        decoder.set_input(data).unwrap();
        decoder.close_input();
        loop {
            let status = decoder.process().unwrap();
            if let Some((buffer, written)) = decoder.release_box_buffer() {
                if let Some(last) = seen.last_mut() {
                    last.contents = buffer[..written].to_vec();
                }
            }
            match status {
                DecoderStatus::Box => {
                    seen.push(SeenBox {
                        box_type: decoder.box_type(false).unwrap(),
                        decoded_type: decoder.box_type(true).unwrap(),
                        size: decoder.box_size_raw().unwrap(),
                        contents: Vec::new(),
                    });
                    decoder.set_box_buffer(free.next().unwrap()).unwrap();
                }
                DecoderStatus::Success => break,
                status => panic!("unexpected {:?}", status),
            }
        }
        seen
    }

    #[test]
    fn test_box_events_and_contents() {
        let xml = b"<x:xmpmeta xmlns:x='adobe:ns:meta/'></x:xmpmeta>".repeat(4);
        let mut encoder = Encoder::new(ImageSettings::gray(4, 4));
        encoder.use_container(true);
        encoder.add_box(BoxType::EXIF, &[1, 2, 3], false).unwrap();
        encoder.add_trailing_box(BoxType::XML, &xml, true).unwrap();
        encoder
            .add_frame(FrameSettings::default(), FrameImage::filled(4, 4, 1, 60))
            .unwrap();
        let data = encoder.finish().unwrap();

        let seen = list_boxes(&data, true);
        let types: Vec<BoxType> = seen.iter().map(|b| b.box_type).collect();
        assert_eq!(
            types,
            vec![
                BoxType::SIGNATURE,
                BoxType::FTYP,
                BoxType::EXIF,
                BoxType::CODESTREAM,
                BoxType::BROTLI_COMPRESSED
            ]
        );
        assert_eq!(seen[1].contents, ftyp());
        assert_eq!(seen[2].size, 11);
        assert_eq!(seen[2].contents, vec![1, 2, 3]);
        assert_eq!(seen[4].decoded_type, BoxType::XML);
        assert_eq!(seen[4].contents, xml);

        let raw = list_boxes(&data, false);
        assert_eq!(raw[4].decoded_type, BoxType::XML);
        assert_ne!(raw[4].contents, xml);
        assert_eq!(raw[4].contents.len() as u64, raw[4].size - 8);
    }

    #[test]
    fn test_captured_boxes_reassemble_file() {
        let mut encoder = Encoder::new(ImageSettings::gray(12, 12));
        encoder.set_codestream_split(Some(9)).unwrap();
        encoder.use_container(true);
        encoder.add_box(BoxType::EXIF, &[0, 0, 0, 0, 7, 7], false).unwrap();
        encoder.add_trailing_box(BoxType::XML, b"<xmp/>", true).unwrap();
        encoder
            .add_frame(FrameSettings::default(), FrameImage::filled(12, 12, 1, 33))
            .unwrap();
        let data = encoder.finish().unwrap();

        let mut reassembled = Vec::new();
        for seen in list_boxes(&data, false) {
            reassembled.extend_from_slice(&(seen.size as u32).to_be_bytes());
            reassembled.extend_from_slice(seen.box_type.as_bytes());
            reassembled.extend_from_slice(&seen.contents);
        }
        assert_eq!(reassembled, data);
    }

    #[test]
    fn test_box_buffer_misuse() {
        let data = container(&[(BoxType::CODESTREAM, bare_codestream())]);
        let mut first = vec![0u8; 16];
        let mut second = vec![0u8; 16];
        let mut decoder = Decoder::new();
        decoder.subscribe_events(Events::BOX).unwrap();
        assert_eq!(decoder.box_type(false), Err(CodecError::NoBoxEvent));
        decoder.set_input(&data).unwrap();
        decoder.close_input();
        assert_eq!(decoder.process(), Ok(DecoderStatus::Box));
        decoder.set_box_buffer(&mut first).unwrap();
        assert_eq!(
            decoder.set_box_buffer(&mut second),
            Err(CodecError::BoxBufferAlreadySet)
        );
        assert_eq!(decoder.process(), Ok(DecoderStatus::Box));
        let (buffer, written) = decoder.release_box_buffer().unwrap();
        assert_eq!(&buffer[..written], &CONTAINER_SIGNATURE[8..]);
    }

    #[test]
    fn test_small_box_buffer_asks_for_more_output() {
        let data = container(&[
            (BoxType::EXIF, (0..20).collect()),
            (BoxType::CODESTREAM, bare_codestream()),
        ]);
        let mut buffers = vec![vec![0u8; 8]; 3];
        let mut collected = Vec::new();
        {
            let mut free = buffers.iter_mut();
            let mut decoder = Decoder::new();
            decoder.subscribe_events(Events::BOX).unwrap();
            decoder.set_input(&data).unwrap();
            decoder.close_input();
            let mut in_exif = false;
            loop {
                match decoder.process().unwrap() {
                    DecoderStatus::Box => {
                        if let Some((buffer, written)) = decoder.release_box_buffer() {
                            collected.extend_from_slice(&buffer[..written]);
                        }
                        in_exif = decoder.box_type(false).unwrap() == BoxType::EXIF;
                        if in_exif {
                            decoder.set_box_buffer(free.next().unwrap()).unwrap();
                        }
                    }
                    DecoderStatus::BoxNeedMoreOutput => {
                        assert!(in_exif);
                        let (buffer, written) = decoder.release_box_buffer().unwrap();
                        collected.extend_from_slice(&buffer[..written]);
                        decoder.set_box_buffer(free.next().unwrap()).unwrap();
                    }
                    DecoderStatus::Success => break,
                    status => panic!("unexpected {:?}", status),
                }
            }
        }
        assert_eq!(collected, (0..20).collect::<Vec<u8>>());
    }

    #[test]
    fn test_reconstruction_metadata() {
        let recon = ReconstructionMetadata {
            exif_size: 3,
            xmp_size: 0,
            payload: vec![9, 8, 7, 6],
            exif: Some(vec![1, 2, 3]),
            xmp: None,
        };
        let mut encoder = Encoder::new(ImageSettings::gray(4, 4));
        encoder.use_container(true);
        encoder.add_reconstruction_metadata(&recon).unwrap();
        encoder
            .add_frame(FrameSettings::default(), FrameImage::filled(4, 4, 1, 60))
            .unwrap();
        let data = encoder.finish().unwrap();

        let mut decoder = Decoder::new();
        decoder.subscribe_events(Events::JPEG_RECONSTRUCTION).unwrap();
        decoder.set_input(&data).unwrap();
        decoder.close_input();
        assert_eq!(decoder.process(), Ok(DecoderStatus::JpegReconstruction));
        assert_eq!(decoder.process(), Ok(DecoderStatus::Success));
        let decoded = decoder.reconstruction_metadata().unwrap();
        assert_eq!(decoded.payload, vec![9, 8, 7, 6]);
        assert_eq!(decoded.exif, Some(vec![1, 2, 3]));
        assert_eq!(decoded.xmp, None);
    }

    #[test]
    fn test_split_codestream_boxes_are_reported() {
        let mut encoder = Encoder::new(ImageSettings::gray(16, 16));
        encoder.set_codestream_split(Some(10)).unwrap();
        encoder.use_container(true);
        encoder
            .add_frame(FrameSettings::default(), FrameImage::filled(16, 16, 1, 5))
            .unwrap();
        let data = encoder.finish().unwrap();
        let seen = list_boxes(&data, true);
        assert!(seen.len() > 3);
        assert!(
            seen[2..]
                .iter()
                .all(|b| b.box_type == BoxType::PARTIAL_CODESTREAM)
        );
    }

    #[test]
    fn test_invalid_signature() {
        let err = first_error(&[0x12; 16], Events::BASIC_INFO);
        assert_eq!(err, CodecError::InvalidSignature);
        assert_eq!(err.category(), ErrorCategory::MalformedInput);
    }

    #[test]
    fn test_ftyp_must_be_second() {
        let mut data = CONTAINER_SIGNATURE.to_vec();
        write_box(&mut data, BoxType::CODESTREAM, &bare_codestream(), false);
        assert_eq!(first_error(&data, Events::BASIC_INFO), CodecError::FtypNotSecond);

        let data = container(&[(BoxType::FTYP, ftyp())]);
        assert_eq!(first_error(&data, Events::BASIC_INFO), CodecError::MisplacedFtyp);
    }

    #[test]
    fn test_ftyp_contents() {
        let mut data = CONTAINER_SIGNATURE.to_vec();
        write_box(&mut data, BoxType::FTYP, b"abcd\0\0\0\0jxl ", false);
        assert_eq!(first_error(&data, Events::BASIC_INFO), CodecError::InvalidBrand);

        let mut data = CONTAINER_SIGNATURE.to_vec();
        write_box(&mut data, BoxType::FTYP, b"jxl \0\0\0\0", false);
        assert_eq!(first_error(&data, Events::BASIC_INFO), CodecError::FtypTooSmall);
    }

    #[test]
    fn test_box_size_smaller_than_header() {
        let mut data = CONTAINER_SIGNATURE.to_vec();
        data.extend_from_slice(&[0, 0, 0, 4]);
        data.extend_from_slice(b"ftyp");
        data.extend_from_slice(&ftyp());
        assert_eq!(first_error(&data, Events::BASIC_INFO), CodecError::InvalidBoxSize);
    }

    #[test]
    fn test_codestream_box_order() {
        let codestream = bare_codestream();
        let data = container(&[
            (BoxType::CODESTREAM, codestream.clone()),
            (BoxType::CODESTREAM, codestream.clone()),
        ]);
        assert_eq!(first_error(&data, Events::BOX), CodecError::DuplicateCodestreamBox);

        let mut last = 0x8000_0000u32.to_be_bytes().to_vec();
        last.extend_from_slice(&codestream);
        let data = container(&[
            (BoxType::PARTIAL_CODESTREAM, last),
            (BoxType::PARTIAL_CODESTREAM, vec![0, 0, 0, 1, 0]),
        ]);
        assert_eq!(
            first_error(&data, Events::BOX),
            CodecError::PartialCodestreamAfterLast
        );
    }

    #[test]
    fn test_compressed_box_too_small() {
        let data = container(&[(BoxType::BROTLI_COMPRESSED, vec![b'x', b'm'])]);
        assert_eq!(first_error(&data, Events::BOX), CodecError::CompressedBoxTooSmall);
    }

    #[test]
    fn test_container_without_codestream() {
        let data = container(&[]);
        assert_eq!(first_error(&data, Events::BASIC_INFO), CodecError::MissingInput);
    }

    #[test]
    fn test_truncated_codestream() {
        let codestream = bare_codestream();
        let err = first_error(&codestream[..3], Events::BASIC_INFO);
        assert_eq!(err, CodecError::MissingInput);
        assert_eq!(err.category(), ErrorCategory::MalformedInput);
    }

    #[test]
    fn test_input_misuse() {
        let data = bare_codestream();
        let mut decoder = Decoder::new();
        decoder.set_input(&data).unwrap();
        assert_eq!(decoder.set_input(&data), Err(CodecError::InputAlreadySet));
        assert_eq!(decoder.process(), Ok(DecoderStatus::Success));
        assert_eq!(
            decoder.subscribe_events(Events::BASIC_INFO),
            Err(CodecError::DecoderStarted)
        );
        assert_eq!(
            Decoder::new().subscribe_events_bits(1 << 30),
            Err(CodecError::InvalidEventMask)
        );
        assert_eq!(CodecError::InputAlreadySet.category(), ErrorCategory::Misuse);
    }
}
