use chatlog_common::{Message, SYSTEM_AUTHOR};

/// Author labels some locales give to notices instead of leaving the author out.
const SYSTEM_AUTHOR_LABELS: &[&str] = &[
    SYSTEM_AUTHOR,
    "Sistema",
    "Système",
    "Systeem",
    "Systemnachricht",
    "WhatsApp",
];

/// How the end-to-end encryption notice opens, per export locale. iOS files the notice under
/// the chat's name, so the body is the only reliable marker.
const ENCRYPTION_NOTICES: &[&str] = &[
    // en
    "Messages and calls are end-to-end encrypted",
    "Messages to this group are now secured with end-to-end encryption",
    "Messages to this chat and calls are now secured with end-to-end encryption",
    "Messages you send to this chat and calls are now secured with end-to-end encryption",
    // es
    "Los mensajes y las llamadas están cifrados de extremo a extremo",
    "Los mensajes en este grupo ahora están protegidos con cifrado de extremo a extremo",
    // pt
    "As mensagens e as chamadas são protegidas com a criptografia de ponta a ponta",
    "As mensagens deste grupo estão protegidas com a criptografia de ponta a ponta",
    // fr
    "Les messages et les appels sont chiffrés de bout en bout",
    "Les messages envoyés dans ce groupe sont désormais protégés avec le chiffrement de bout en bout",
    // de
    "Nachrichten und Anrufe sind Ende-zu-Ende-verschlüsselt",
    "Nachrichten in dieser Gruppe sind jetzt mit Ende-zu-Ende-Verschlüsselung geschützt",
    // it
    "I messaggi e le chiamate sono crittografati end-to-end",
    "I messaggi inviati a questo gruppo sono ora protetti con la crittografia end-to-end",
    // nl
    "Berichten en oproepen worden end-to-end versleuteld",
    "Berichten die naar deze groep worden verzonden, zijn nu beveiligd met end-to-end versleuteling",
];

/// Files every system notice under [`SYSTEM_AUTHOR`], whatever label the export gave it.
pub fn normalize(messages: Vec<Message>) -> Vec<Message> {
    let mut rewritten = 0;
    let messages = messages
        .into_iter()
        .map(|mut message| {
            if is_system_notice(&message) && !message.is_system() {
                message.author = SYSTEM_AUTHOR.into();
                rewritten += 1;
            }
            message
        })
        .collect();
    tracing::debug!(rewritten, "normalized authors");
    messages
}

fn is_system_notice(message: &Message) -> bool {
    if SYSTEM_AUTHOR_LABELS.contains(&&*message.author) {
        return true;
    }
    let body = message.body.trim_start_matches(['\u{200e}', '\u{200f}']);
    ENCRYPTION_NOTICES
        .iter()
        .any(|notice| body.starts_with(notice))
}

#[cfg(test)]
mod tests {
    use chatlog_common::Participants;
    use chrono::NaiveDateTime;

    use super::*;

    fn message(author: &str, body: &str) -> Message {
        Message {
            timestamp: NaiveDateTime::default(),
            author: author.into(),
            body: body.into(),
            attachment: None,
        }
    }

    #[test]
    fn encryption_notices_become_system() {
        let messages = normalize(vec![
            message(
                "Trip 2020",
                "\u{200e}Messages and calls are end-to-end encrypted. No one outside of this chat can read them.",
            ),
            message("Familia", "Los mensajes y las llamadas están cifrados de extremo a extremo."),
            message("Sistema", "Juan se unió"),
            message("Alice", "hi"),
        ]);
        let authors = messages
            .iter()
            .map(|message| &*message.author)
            .collect::<Vec<_>>();
        assert_eq!(authors, [SYSTEM_AUTHOR, SYSTEM_AUTHOR, SYSTEM_AUTHOR, "Alice"]);
        assert_eq!(
            &*messages[1].body,
            "Los mensajes y las llamadas están cifrados de extremo a extremo."
        );
    }

    #[test]
    fn every_locale_notice_and_label_becomes_system() {
        let notices = ENCRYPTION_NOTICES
            .iter()
            .map(|notice| message("Group chat", &format!("\u{200e}{notice}. Tap to learn more.")));
        let labels = SYSTEM_AUTHOR_LABELS
            .iter()
            .map(|label| message(label, "Alice added Bob"));
        let messages = normalize(notices.chain(labels).collect());
        assert_eq!(
            messages.len(),
            ENCRYPTION_NOTICES.len() + SYSTEM_AUTHOR_LABELS.len()
        );
        for message in &messages {
            assert!(message.is_system(), "{:?} kept its author", message.body);
        }
    }

    #[test]
    fn mentions_of_encryption_are_left_alone() {
        let messages = normalize(vec![message(
            "Bob",
            "are messages and calls end-to-end encrypted?",
        )]);
        assert_eq!(&*messages[0].author, "Bob");
    }

    #[test]
    fn participants_never_include_notice_authors() {
        let messages = normalize(vec![
            message("Trip 2020", "Messages to this group are now secured with end-to-end encryption."),
            message("WhatsApp", "Your security code with Bob changed."),
            message("Bob", "hi"),
        ]);
        let participants = Participants::from_messages(&messages);
        assert_eq!(participants.iter().map(|p| &**p).collect::<Vec<_>>(), ["Bob"]);
    }
}
