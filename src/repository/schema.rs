diesel::table! {
    todos (uid) {
        uid -> Text,
        user_id -> Nullable<Text>,
        session_key -> Nullable<Text>,
        todo_title -> Text,
        todo_description -> Text,
        is_done -> Bool,
        created_at -> Date,
        updated_at -> Date,
    }
}

diesel::table! {
    timing_todos (uid) {
        uid -> Text,
        todo_uid -> Text,
        schedule_date -> Date,
        start_time -> Nullable<Time>,
        end_time -> Nullable<Time>,
        note -> Nullable<Text>,
        created_at -> Date,
        updated_at -> Date,
    }
}

diesel::table! {
    reminders (uid) {
        uid -> Text,
        todo_uid -> Text,
        message -> Text,
        is_sent -> Bool,
        created_at -> Timestamp,
    }
}

diesel::joinable!(timing_todos -> todos (todo_uid));
diesel::joinable!(reminders -> todos (todo_uid));

diesel::allow_tables_to_appear_in_same_query!(todos, timing_todos, reminders);
