use bandwatch_modem::modem::framer::{echo_forms, frame, is_complete, normalize};
use proptest::prelude::*;

/// Vendor queries such as `AT$QCRSRP?` or `AT$QCSQ`.
fn vendor_command() -> impl Strategy<Value = String> {
    ("[A-Z]{1,8}", any::<bool>())
        .prop_map(|(name, query)| format!("AT${name}{}", if query { "?" } else { "" }))
}

/// Payload lines that cannot be mistaken for an echo or a terminal marker.
fn payload_lines() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[0-9,\\- ]{0,24}", 0..4)
}

fn terminal() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("OK"), Just("ERROR")]
}

proptest! {
    #[test]
    fn any_echo_form_then_terminal_is_complete(
        command in vendor_command(),
        form in 0usize..5,
        noise in payload_lines(),
        payload in payload_lines(),
        end in terminal(),
    ) {
        let forms = echo_forms(&command);
        let mut lines = noise.clone();
        lines.push(forms[form].clone());
        lines.extend(payload.iter().cloned());
        lines.push(end.to_string());

        prop_assert!(is_complete(&command, &lines));
        prop_assert_eq!(frame(&command, &lines), Some((noise.len(), lines.len() - 1)));
    }

    #[test]
    fn terminal_without_echo_is_incomplete(
        command in vendor_command(),
        payload in payload_lines(),
        end in terminal(),
    ) {
        let mut lines = payload;
        lines.push(end.to_string());
        prop_assert!(!is_complete(&command, &lines));
    }

    #[test]
    fn echo_without_terminal_is_incomplete(
        command in vendor_command(),
        payload in payload_lines(),
    ) {
        let mut lines = vec![command.clone()];
        lines.extend(payload);
        prop_assert!(!is_complete(&command, &lines));
    }

    #[test]
    fn normalize_is_stable_on_its_output(
        command in vendor_command(),
        first in "[0-9,\\-]{1,24}",
        rest in payload_lines(),
        end in terminal(),
    ) {
        let label = command.trim_start_matches("AT").trim_end_matches('?');
        let mut raw = vec![command.clone(), format!("{label}: {first}")];
        raw.extend(rest);
        raw.push(end.to_string());

        let once = normalize(&command, &raw);
        let twice = normalize(&command, &once.lines);
        prop_assert_eq!(&twice.lines, &once.lines);
        prop_assert_eq!(once.succeeded, end == "OK");
    }
}
