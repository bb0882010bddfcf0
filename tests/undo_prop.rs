//! 取り消し履歴のプロパティテスト
//!
//! 任意の編集列のあと、すべて取り消せば元の文書と選択範囲に、すべてやり直せば編集後の文書に戻ることを確かめる。

use altre_doc::{Change, DocId, Engine, Pos};
use proptest::test_runner::Config as ProptestConfig;
use proptest::{prelude::*, prop_oneof};

#[derive(Debug, Clone)]
enum Edit {
    Insert { at: (u16, u16), text: String, origin: Option<&'static str> },
    Delete { from: (u16, u16), to: (u16, u16) },
    Replace { from: (u16, u16), to: (u16, u16), text: String },
}

fn small_text() -> impl Strategy<Value = String> {
    proptest::collection::vec(prop_oneof![Just('a'), Just('z'), Just(' '), Just('\n'), Just('é'), Just('日')], 0..6)
        .prop_map(|chars| chars.into_iter().collect())
}

fn seed() -> impl Strategy<Value = (u16, u16)> {
    (any::<u16>(), any::<u16>())
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    let origin = prop_oneof![Just(None), Just(Some("+input")), Just(Some("*compose"))];
    let insert = (seed(), small_text(), origin).prop_map(|(at, text, origin)| Edit::Insert { at, text, origin });
    let delete = (seed(), seed()).prop_map(|(from, to)| Edit::Delete { from, to });
    let replace = (seed(), seed(), small_text()).prop_map(|(from, to, text)| Edit::Replace { from, to, text });
    prop_oneof![3 => insert, 1 => delete, 1 => replace]
}

fn pos_from_seed(engine: &Engine, doc: DocId, (line, col): (u16, u16)) -> Pos {
    let d = engine.doc(doc).unwrap();
    let line = d.first_line() + line as usize % d.line_count();
    let len = d.get_line(line).unwrap().chars().count();
    Pos::new(line, col as usize % (len + 1))
}

fn ordered(a: Pos, b: Pos) -> (Pos, Pos) {
    if b < a {
        (b, a)
    } else {
        (a, b)
    }
}

fn apply_edit(engine: &mut Engine, doc: DocId, edit: &Edit) {
    let change = match edit {
        Edit::Insert { at, text, origin } => {
            let change = Change::insert(pos_from_seed(engine, doc, *at), text);
            match origin {
                Some(origin) => change.with_origin(*origin),
                None => change,
            }
        }
        Edit::Delete { from, to } => {
            let (from, to) = ordered(pos_from_seed(engine, doc, *from), pos_from_seed(engine, doc, *to));
            Change::delete(from, to)
        }
        Edit::Replace { from, to, text } => {
            let (from, to) = ordered(pos_from_seed(engine, doc, *from), pos_from_seed(engine, doc, *to));
            Change::from_text(from, to, text)
        }
    };
    engine.apply(doc, change).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    #[test]
    fn undo_all_then_redo_all_round_trips(
        initial in small_text(),
        edits in proptest::collection::vec(edit_strategy(), 1..24)
    ) {
        let mut engine = Engine::default();
        let doc = engine.create_doc(&initial);
        let before = engine.doc(doc).unwrap().get_value();

        for edit in &edits {
            apply_edit(&mut engine, doc, edit);
        }
        let after = engine.doc(doc).unwrap().get_value();
        let (groups, _) = engine.history_size(doc).unwrap();

        for _ in 0..groups {
            engine.undo(doc).unwrap();
        }
        prop_assert_eq!(engine.doc(doc).unwrap().get_value(), before);
        prop_assert_eq!(engine.doc(doc).unwrap().selection().primary(), altre_doc::Range::cursor(Pos::new(0, 0)));
        prop_assert_eq!(engine.history_size(doc).unwrap(), (0, groups));

        for _ in 0..groups {
            engine.redo(doc).unwrap();
        }
        prop_assert_eq!(engine.doc(doc).unwrap().get_value(), after);
        prop_assert!(engine.doc(doc).unwrap().selection().is_normalized(false));
    }

    #[test]
    fn linked_copy_tracks_undo(
        initial in small_text(),
        edits in proptest::collection::vec(edit_strategy(), 1..12)
    ) {
        let mut engine = Engine::default();
        let doc = engine.create_doc(&initial);
        let copy = engine.link_doc(doc, Default::default()).unwrap();

        for edit in &edits {
            apply_edit(&mut engine, doc, edit);
            prop_assert_eq!(
                engine.doc(copy).unwrap().get_value(),
                engine.doc(doc).unwrap().get_value()
            );
        }
        while engine.history_size(doc).unwrap().0 > 0 {
            engine.undo(doc).unwrap();
        }
        prop_assert_eq!(engine.doc(copy).unwrap().get_value(), engine.doc(doc).unwrap().get_value());
    }
}
