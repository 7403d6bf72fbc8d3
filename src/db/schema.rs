diesel::table! {
    comments (id) {
        id -> Integer,
        post_id -> Integer,
        author_id -> Integer,
        text -> Text,
        created -> Timestamp,
    }
}

diesel::table! {
    follows (id) {
        id -> Integer,
        user_id -> Integer,
        author_id -> Integer,
    }
}

diesel::table! {
    post_groups (id) {
        id -> Integer,
        title -> Text,
        slug -> Text,
        description -> Text,
    }
}

diesel::table! {
    posts (id) {
        id -> Integer,
        text -> Text,
        pub_date -> Timestamp,
        author_id -> Integer,
        group_id -> Nullable<Integer>,
        image -> Nullable<Text>,
    }
}

diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        email -> Text,
        full_name -> Text,
        password_hash -> Text,
        date_joined -> Timestamp,
    }
}

diesel::joinable!(comments -> posts (post_id));
diesel::joinable!(comments -> users (author_id));
diesel::joinable!(posts -> post_groups (group_id));
diesel::joinable!(posts -> users (author_id));

diesel::allow_tables_to_appear_in_same_query!(comments, follows, post_groups, posts, users);
